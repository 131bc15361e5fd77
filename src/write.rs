//! Writing connector fragments to their persisted XML form
//!
//! The mirror of [`crate::read`]. Endpoint locations are converted to
//! relative against the fragment's current location before being emitted,
//! and location fields equal to the relative default (zero) are omitted.
//! The payload element is written only on the chain-first fragment; the
//! reader relies on that asymmetry when reconstructing chains.

use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

use crate::fragment::ConnectorFragment;
use crate::location::{Location, LocationError, Rational};

/// Current writing position, owned by the single save operation's scope.
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    measure_index: i32,
    cur_tick: Rational,
    cur_track: i32,
}

impl WriteContext {
    pub fn new() -> Self {
        WriteContext {
            measure_index: 0,
            cur_tick: Rational::new(0, 1),
            cur_track: 0,
        }
    }

    pub fn cur_tick(&self) -> Rational {
        self.cur_tick
    }

    pub fn set_cur_tick(&mut self, tick: Rational) {
        self.cur_tick = tick;
    }

    pub fn inc_cur_tick(&mut self, delta: Rational) {
        self.cur_tick += delta;
    }

    pub fn cur_track(&self) -> i32 {
        self.cur_track
    }

    pub fn set_cur_track(&mut self, track: i32) {
        self.cur_track = track;
    }

    pub fn measure_index(&self) -> i32 {
        self.measure_index
    }

    pub fn set_measure_index(&mut self, index: i32) {
        self.measure_index = index;
    }

    /// The absolute location of the current writing point.
    pub fn location(&self) -> Location {
        Location::absolute()
            .with_measure(self.measure_index)
            .with_frac(self.cur_tick)
            .with_track(self.cur_track)
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("xml write error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("location error: {0}")]
    Location(#[from] LocationError),
}

/// Emits one fragment block.
///
/// Endpoint locations may be given absolute (they are made relative here)
/// or already relative. A payload on a non-first fragment violates the
/// persisted-form invariant and is skipped with a warning.
pub fn write_fragment<W: Write>(
    writer: &mut Writer<W>,
    fragment: &ConnectorFragment,
) -> Result<(), WriteError> {
    let kind = fragment.kind();
    let mut block = BytesStart::new("Spanner");
    block.push_attribute(("type", kind.name()));
    writer.write_event(Event::Start(block))?;

    if let Some(payload) = fragment.payload() {
        if fragment.has_previous() {
            log::warn!(
                "{} payload on a non-first fragment; not writing it",
                kind.name()
            );
        } else {
            writer.write_event(Event::Start(BytesStart::new(kind.name())))?;
            for (name, value) in &payload.properties {
                write_text_element(writer, name, value)?;
            }
            writer.write_event(Event::End(BytesEnd::new(kind.name())))?;
        }
    }

    if let Some(prev) = fragment.prev_loc() {
        let rel = prev.to_relative(fragment.current())?;
        write_endpoint_location(writer, "prev", &rel)?;
    }
    if let Some(next) = fragment.next_loc() {
        let rel = next.to_relative(fragment.current())?;
        write_endpoint_location(writer, "next", &rel)?;
    }

    writer.write_event(Event::End(BytesEnd::new("Spanner")))?;
    Ok(())
}

/// Emits one fragment block as a standalone XML string.
pub fn write_fragment_string(fragment: &ConnectorFragment) -> Result<String, WriteError> {
    let mut writer = Writer::new(Vec::new());
    write_fragment(&mut writer, fragment)?;
    // the writer only ever produces UTF-8
    Ok(String::from_utf8(writer.into_inner()).unwrap_or_default())
}

fn write_endpoint_location<W: Write>(
    writer: &mut Writer<W>,
    wrapper: &str,
    loc: &Location,
) -> Result<(), WriteError> {
    writer.write_event(Event::Start(BytesStart::new(wrapper)))?;
    writer.write_event(Event::Start(BytesStart::new("location")))?;
    if loc.measure() != 0 {
        write_text_element(writer, "measures", &loc.measure().to_string())?;
    }
    if loc.frac() != Rational::new(0, 1) {
        let frac = format!("{}/{}", loc.frac().numer(), loc.frac().denom());
        write_text_element(writer, "fractions", &frac)?;
    }
    if loc.track() != 0 {
        write_text_element(writer, "track", &loc.track().to_string())?;
    }
    if loc.note() != 0 {
        write_text_element(writer, "note", &loc.note().to_string())?;
    }
    if loc.grace() != 0 {
        write_text_element(writer, "grace", &loc.grace().to_string())?;
    }
    writer.write_event(Event::End(BytesEnd::new("location")))?;
    writer.write_event(Event::End(BytesEnd::new(wrapper)))?;
    Ok(())
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> Result<(), WriteError> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{ConnectorKind, SpannerElement};

    fn loc(measure: i32, num: i32, den: i32, track: i32) -> Location {
        Location::absolute()
            .with_measure(measure)
            .with_frac(Rational::new(num, den))
            .with_track(track)
            .with_note(0)
            .with_grace(0)
    }

    #[test]
    fn writes_payload_on_chain_first_only() {
        let first = ConnectorFragment::new(ConnectorKind::Tie, loc(1, 0, 1, 0))
            .with_next(loc(2, 0, 1, 0))
            .with_payload(SpannerElement::new(ConnectorKind::Tie, 0));
        let xml = write_fragment_string(&first).unwrap();
        assert!(xml.contains("<Tie>"));
        assert!(xml.contains("<next>"));
        assert!(!xml.contains("<prev>"));

        // payload illegally placed on a continuation fragment is skipped
        let continuation = ConnectorFragment::new(ConnectorKind::Tie, loc(2, 0, 1, 0))
            .with_prev(loc(1, 0, 1, 0))
            .with_payload(SpannerElement::new(ConnectorKind::Tie, 0));
        let xml = write_fragment_string(&continuation).unwrap();
        assert!(!xml.contains("<Tie>"));
        assert!(xml.contains("<prev>"));
    }

    #[test]
    fn endpoint_locations_are_written_relative() {
        let frag = ConnectorFragment::new(ConnectorKind::Slur, loc(3, 1, 4, 2))
            .with_next(loc(5, 1, 2, 2));
        let xml = write_fragment_string(&frag).unwrap();
        // 5 - 3 measures, 1/2 - 1/4 ticks, same track
        assert!(xml.contains("<measures>2</measures>"));
        assert!(xml.contains("<fractions>1/4</fractions>"));
        assert!(!xml.contains("<track>"));
    }

    #[test]
    fn default_relative_fields_are_omitted() {
        let frag = ConnectorFragment::new(ConnectorKind::Tie, loc(1, 0, 1, 0))
            .with_next(loc(1, 0, 1, 0));
        let xml = write_fragment_string(&frag).unwrap();
        assert!(xml.contains("<location></location>"));
    }

    #[test]
    fn payload_properties_are_emitted_in_order() {
        let frag = ConnectorFragment::new(ConnectorKind::Hairpin, loc(0, 0, 1, 0)).with_payload(
            SpannerElement::new(ConnectorKind::Hairpin, 0)
                .with_property("subtype", "0")
                .with_property("placement", "below"),
        );
        let xml = write_fragment_string(&frag).unwrap();
        let subtype = xml.find("<subtype>").unwrap();
        let placement = xml.find("<placement>").unwrap();
        assert!(subtype < placement);
    }
}
