//! spanchain — connector resolution engine
//!
//! Reconstructs multi-part spanning notations (ties, slurs, hairpins,
//! pedal lines, ...) from independently-emitted, partially-specified
//! fragments produced while reading a document, e.g. across a part/score
//! split. Fragments arrive in arbitrary order; the engine matches them
//! into ordered chains with a deterministic distance metric, rejects
//! cyclic or unresolvable configurations, and hands each completed chain
//! to its receiver in chain order.
//!
//! Connector problems never abort a load: at worst individual spanning
//! markings are missing from the loaded document, surfaced as warnings in
//! the engine's load report.

pub mod diagnostics;
pub mod engine;
pub mod fragment;
pub mod location;
pub mod read;
pub mod write;

pub use diagnostics::{DiagnosticMark, DiagnosticSeverity, Diagnostics};
pub use engine::{ConnectorReceiver, FragmentId, InstallError, ResolutionEngine};
pub use fragment::{ConnectorFragment, ConnectorKind, SpannerElement};
pub use location::{distance, Location, LocationError, LocationMode, Rational};
pub use read::{read_fragment, read_fragment_str, ReadContext, ReadError};
pub use write::{write_fragment, write_fragment_string, WriteContext, WriteError};
