//! Reading connector fragments from their persisted XML form
//!
//! A fragment block looks like:
//!
//! ```xml
//! <Spanner type="Tie">
//!   <Tie><up>1</up></Tie>                <!-- payload, chain-first only -->
//!   <prev><location><measures>-1</measures></location></prev>
//!   <next><location><fractions>1/4</fractions></location></next>
//! </Spanner>
//! ```
//!
//! The structured reader walking the document owns a [`ReadContext`]
//! tracking the current measure, tick and track; the fragment's own
//! location is taken from that context, while the `prev`/`next` blocks
//! carry locations relative to it.

use roxmltree::Node;
use thiserror::Error;

use crate::diagnostics::{DiagnosticMark, DiagnosticSeverity, Diagnostics};
use crate::fragment::{ConnectorFragment, ConnectorKind, SpannerElement};
use crate::location::{Location, Rational};

/// Current reading position, owned by the single load operation's scope
/// and threaded explicitly through the reader call chain.
#[derive(Debug, Clone, Default)]
pub struct ReadContext {
    measure_index: i32,
    tick: Rational,
    tick_offset: Rational,
    track: i32,
    track_offset: i32,
}

impl ReadContext {
    pub fn new() -> Self {
        ReadContext {
            measure_index: 0,
            tick: Rational::new(0, 1),
            tick_offset: Rational::new(0, 1),
            track: 0,
            track_offset: 0,
        }
    }

    pub fn tick(&self) -> Rational {
        self.tick + self.tick_offset
    }

    pub fn set_tick(&mut self, tick: Rational) {
        self.tick = tick;
    }

    pub fn inc_tick(&mut self, delta: Rational) {
        self.tick += delta;
    }

    pub fn set_tick_offset(&mut self, offset: Rational) {
        self.tick_offset = offset;
    }

    pub fn track(&self) -> i32 {
        self.track + self.track_offset
    }

    pub fn set_track(&mut self, track: i32) {
        self.track = track;
    }

    pub fn set_track_offset(&mut self, offset: i32) {
        self.track_offset = offset;
    }

    pub fn measure_index(&self) -> i32 {
        self.measure_index
    }

    pub fn set_measure_index(&mut self, index: i32) {
        self.measure_index = index;
    }

    /// The absolute location of the current reading point.
    pub fn location(&self) -> Location {
        Location::absolute()
            .with_measure(self.measure_index)
            .with_frac(self.tick())
            .with_track(self.track())
    }
}

/// Errors that make a fragment block unreadable. Anything less severe is
/// recovered locally (the offending sub-element is skipped and the
/// fragment marked unusable).
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    /// The block has no `type` attribute.
    #[error("connector block is missing its type attribute")]
    MissingType,
    /// The `type` attribute names no known connector kind.
    #[error("unknown connector kind: {0}")]
    UnknownKind(String),
    /// The block is not well-formed XML.
    #[error("unparsable connector block: {0}")]
    Xml(String),
}

/// Parses one fragment block. The fragment's current location is filled
/// from `ctx`; `prev`/`next` endpoint locations are left relative (they
/// are resolved against the current location during reconciliation).
///
/// A payload whose tag disagrees with the declared kind, or an unknown
/// sub-element, is skipped with a warning and the fragment is marked
/// unusable; its chain will be treated as broken.
pub fn read_fragment(
    node: Node,
    ctx: &ReadContext,
    diagnostics: &mut Diagnostics,
) -> Result<ConnectorFragment, ReadError> {
    let type_name = node.attribute("type").ok_or(ReadError::MissingType)?;
    let kind = ConnectorKind::from_name(type_name)
        .ok_or_else(|| ReadError::UnknownKind(type_name.to_string()))?;

    let current = ctx.location();
    let mut fragment = ConnectorFragment::new(kind, current);

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "prev" => {
                if let Some(loc) = read_endpoint_location(child) {
                    fragment.set_prev_loc(loc);
                }
            }
            "next" => {
                if let Some(loc) = read_endpoint_location(child) {
                    fragment.set_next_loc(loc);
                }
            }
            tag if tag == kind.name() => {
                fragment = fragment.with_payload(read_payload(child, kind, ctx.track()));
            }
            tag => {
                // Either the payload tag disagrees with the declared kind
                // or the block carries something we don't know. Skip it,
                // keep reading; the chain is treated as broken.
                if ConnectorKind::from_name(tag).is_some() {
                    log::warn!(
                        "element tag ({}) does not match connector type ({}); corrupted file?",
                        tag,
                        type_name
                    );
                    diagnostics.add(DiagnosticMark::new(
                        current.measure(),
                        current.track(),
                        DiagnosticSeverity::Warning,
                        "connector_kind_mismatch",
                        format!("element tag {} does not match connector type {}", tag, type_name),
                    ));
                } else {
                    log::warn!("unknown tag {} in {} connector block", tag, type_name);
                    diagnostics.add(DiagnosticMark::new(
                        current.measure(),
                        current.track(),
                        DiagnosticSeverity::Warning,
                        "connector_unknown_tag",
                        format!("unknown tag {} in {} connector block", tag, type_name),
                    ));
                }
                fragment.mark_unusable();
            }
        }
    }
    Ok(fragment)
}

/// Parses one fragment block from a standalone XML string. Convenience
/// wrapper for hosts that hand fragment blocks around as text.
pub fn read_fragment_str(
    xml: &str,
    ctx: &ReadContext,
    diagnostics: &mut Diagnostics,
) -> Result<ConnectorFragment, ReadError> {
    let doc =
        roxmltree::Document::parse(xml).map_err(|err| ReadError::Xml(err.to_string()))?;
    read_fragment(doc.root_element(), ctx, diagnostics)
}

fn read_payload(node: Node, kind: ConnectorKind, track: i32) -> SpannerElement {
    let mut payload = SpannerElement::new(kind, track);
    for child in node.children().filter(|n| n.is_element()) {
        let name = child.tag_name().name().to_string();
        let text = child.text().unwrap_or("").trim().to_string();
        payload.properties.push((name, text));
    }
    payload
}

/// Reads the `<location>` block inside a `prev`/`next` wrapper. Returns
/// `None` when no location block is present.
fn read_endpoint_location(node: Node) -> Option<Location> {
    let loc_node = node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "location")?;
    Some(read_location(loc_node))
}

fn read_location(node: Node) -> Location {
    let mut loc = Location::relative();
    for child in node.children().filter(|n| n.is_element()) {
        let text = child.text().unwrap_or("").trim();
        match child.tag_name().name() {
            "measures" => {
                if let Some(v) = parse_int(text, "measures") {
                    loc = loc.with_measure(v);
                }
            }
            "fractions" => {
                if let Some(v) = parse_fraction(text) {
                    loc = loc.with_frac(v);
                }
            }
            "track" => {
                if let Some(v) = parse_int(text, "track") {
                    loc = loc.with_track(v);
                }
            }
            "note" => {
                if let Some(v) = parse_int(text, "note") {
                    loc = loc.with_note(v);
                }
            }
            "grace" => {
                if let Some(v) = parse_int(text, "grace") {
                    loc = loc.with_grace(v);
                }
            }
            tag => log::warn!("unknown tag {} in location block", tag),
        }
    }
    loc
}

fn parse_int(text: &str, field: &str) -> Option<i32> {
    match text.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("invalid {} value in location block: {:?}", field, text);
            None
        }
    }
}

fn parse_fraction(text: &str) -> Option<Rational> {
    let (num, den) = text.split_once('/')?;
    let num: i32 = num.trim().parse().ok()?;
    let den: i32 = den.trim().parse().ok()?;
    if den == 0 {
        log::warn!("invalid fractions value in location block: {:?}", text);
        return None;
    }
    Some(Rational::new(num, den))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_at(measure: i32, track: i32) -> ReadContext {
        let mut ctx = ReadContext::new();
        ctx.set_measure_index(measure);
        ctx.set_track(track);
        ctx
    }

    #[test]
    fn reads_chain_first_fragment() {
        let xml = r#"<Spanner type="Slur">
            <Slur><up>1</up></Slur>
            <next><location><measures>2</measures><fractions>1/4</fractions></location></next>
        </Spanner>"#;
        let mut diags = Diagnostics::new();
        let frag = read_fragment_str(xml, &ctx_at(3, 1), &mut diags).unwrap();

        assert_eq!(frag.kind(), ConnectorKind::Slur);
        assert_eq!(frag.current().measure(), 3);
        assert_eq!(frag.current().track(), 1);
        assert!(!frag.has_previous());
        assert!(frag.has_next());
        let next = frag.next_loc().unwrap();
        assert!(next.is_relative());
        assert_eq!(next.measure(), 2);
        assert_eq!(next.frac(), Rational::new(1, 4));
        let payload = frag.payload().unwrap();
        assert_eq!(payload.properties, vec![("up".to_string(), "1".to_string())]);
        assert!(diags.is_empty());
    }

    #[test]
    fn reads_continuation_fragment_without_payload() {
        let xml = r#"<Spanner type="Tie">
            <prev><location><measures>-1</measures></location></prev>
        </Spanner>"#;
        let mut diags = Diagnostics::new();
        let frag = read_fragment_str(xml, &ctx_at(5, 0), &mut diags).unwrap();

        assert!(frag.payload().is_none());
        assert!(frag.has_previous());
        assert!(!frag.has_next());
        assert_eq!(frag.prev_loc().unwrap().measure(), -1);
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let xml = r#"<Spanner type="Wobble"/>"#;
        let mut diags = Diagnostics::new();
        let err = read_fragment_str(xml, &ReadContext::new(), &mut diags).unwrap_err();
        assert!(matches!(err, ReadError::UnknownKind(name) if name == "Wobble"));
    }

    #[test]
    fn kind_mismatch_marks_fragment_unusable() {
        // declared as a Tie but the payload element is a Slur
        let xml = r#"<Spanner type="Tie">
            <Slur><up>1</up></Slur>
            <next><location/></next>
        </Spanner>"#;
        let mut diags = Diagnostics::new();
        let frag = read_fragment_str(xml, &ReadContext::new(), &mut diags).unwrap();

        assert!(!frag.usable());
        assert_eq!(diags.of_kind("connector_kind_mismatch").count(), 1);
    }

    #[test]
    fn unknown_tag_is_skipped_with_warning() {
        let xml = r#"<Spanner type="Hairpin">
            <garbage/>
            <Hairpin><subtype>0</subtype></Hairpin>
        </Spanner>"#;
        let mut diags = Diagnostics::new();
        let frag = read_fragment_str(xml, &ReadContext::new(), &mut diags).unwrap();

        assert!(!frag.usable());
        assert!(frag.payload().is_some(), "reading continues past bad tags");
        assert_eq!(diags.of_kind("connector_unknown_tag").count(), 1);
    }

    #[test]
    fn bad_location_fields_fall_back_to_defaults() {
        let xml = r#"<Spanner type="Tie">
            <prev><location><measures>abc</measures><fractions>1/0</fractions></location></prev>
        </Spanner>"#;
        let mut diags = Diagnostics::new();
        let frag = read_fragment_str(xml, &ReadContext::new(), &mut diags).unwrap();
        let prev = frag.prev_loc().unwrap();
        assert_eq!(prev.measure(), 0);
        assert_eq!(prev.frac(), Rational::new(0, 1));
    }

    #[test]
    fn context_tracks_tick_and_offsets() {
        let mut ctx = ReadContext::new();
        ctx.set_tick(Rational::new(1, 4));
        ctx.inc_tick(Rational::new(1, 4));
        ctx.set_tick_offset(Rational::new(1, 2));
        assert_eq!(ctx.tick(), Rational::new(1, 1));
        ctx.set_track(4);
        ctx.set_track_offset(4);
        assert_eq!(ctx.track(), 8);
    }
}
