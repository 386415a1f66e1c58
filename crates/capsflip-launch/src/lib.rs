//! Parser for the linear launch-description subset used by capsflip topologies.
//!
//! Parses `factory key=value ... ! factory ...` chains, including caps
//! shorthand links (`video/x-raw,format=I420`) and typed `caps=` properties.
//! Produces a typed AST: [`Topology`], [`ElementDecl`], [`PropertyValue`], [`Caps`].
//!
//! # Example
//! ```
//! let topology = capsflip_launch::parse("videotestsrc ! fakesink num-buffers=10").unwrap();
//! assert_eq!(topology.elements.len(), 2);
//! assert_eq!(topology.elements[0].name, "videotestsrc0");
//! ```

pub mod ast;
mod parser;

pub use ast::*;
pub use parser::{parse, parse_caps};
