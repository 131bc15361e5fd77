//! Connector fragments and their payloads
//!
//! A spanning notation (tie, slur, hairpin, ...) that crosses a
//! serialization boundary is persisted as two or more fragments, each
//! carrying its own location plus optional relative locations of its
//! neighbours in the chain. The payload element travels only on the
//! chain-first fragment.

use serde::{Deserialize, Serialize};

use crate::location::Location;

/// The closed set of spanning-notation kinds a fragment can belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorKind {
    Tie,
    Slur,
    Hairpin,
    Ottava,
    Pedal,
    Trill,
    TextLine,
    Glissando,
}

impl ConnectorKind {
    /// Tag text used in the persisted form.
    pub fn name(&self) -> &'static str {
        match self {
            ConnectorKind::Tie => "Tie",
            ConnectorKind::Slur => "Slur",
            ConnectorKind::Hairpin => "Hairpin",
            ConnectorKind::Ottava => "Ottava",
            ConnectorKind::Pedal => "Pedal",
            ConnectorKind::Trill => "Trill",
            ConnectorKind::TextLine => "TextLine",
            ConnectorKind::Glissando => "Glissando",
        }
    }

    /// Inverse of [`name`](Self::name); `None` for unknown tag text.
    pub fn from_name(name: &str) -> Option<ConnectorKind> {
        match name {
            "Tie" => Some(ConnectorKind::Tie),
            "Slur" => Some(ConnectorKind::Slur),
            "Hairpin" => Some(ConnectorKind::Hairpin),
            "Ottava" => Some(ConnectorKind::Ottava),
            "Pedal" => Some(ConnectorKind::Pedal),
            "Trill" => Some(ConnectorKind::Trill),
            "TextLine" => Some(ConnectorKind::TextLine),
            "Glissando" => Some(ConnectorKind::Glissando),
            _ => None,
        }
    }
}

/// The owned document element carried by the chain-first fragment.
///
/// Properties are the payload element's child tags and their text, kept
/// verbatim; the receiver decides how to interpret them when the chain is
/// installed into the live document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpannerElement {
    pub kind: ConnectorKind,
    pub track: i32,
    pub properties: Vec<(String, String)>,
}

impl SpannerElement {
    pub fn new(kind: ConnectorKind, track: i32) -> Self {
        SpannerElement {
            kind,
            track,
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }
}

/// One endpoint-bearing piece of a spanning relation.
///
/// A fragment that declares neither a previous nor a next neighbour is a
/// complete, self-contained relation (a chain of length 1). Links between
/// fragments are owned by the resolution engine's arena, not by the
/// fragment itself.
#[derive(Clone, Debug)]
pub struct ConnectorFragment {
    kind: ConnectorKind,
    current: Location,
    prev_loc: Option<Location>,
    next_loc: Option<Location>,
    payload: Option<SpannerElement>,
    updated: bool,
    usable: bool,
}

impl ConnectorFragment {
    /// Creates a fragment found at `current`. The location counts as
    /// resolved when it is already absolute.
    pub fn new(kind: ConnectorKind, current: Location) -> Self {
        ConnectorFragment {
            kind,
            current,
            prev_loc: None,
            next_loc: None,
            payload: None,
            updated: current.is_absolute(),
            usable: true,
        }
    }

    pub fn with_prev(mut self, loc: Location) -> Self {
        self.prev_loc = Some(loc);
        self
    }

    pub fn with_next(mut self, loc: Location) -> Self {
        self.next_loc = Some(loc);
        self
    }

    pub fn with_payload(mut self, payload: SpannerElement) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn kind(&self) -> ConnectorKind {
        self.kind
    }

    pub fn current(&self) -> &Location {
        &self.current
    }

    pub fn set_current(&mut self, loc: Location) {
        self.current = loc;
        self.updated = loc.is_absolute();
    }

    /// Whether this fragment expects a predecessor in its chain.
    pub fn has_previous(&self) -> bool {
        self.prev_loc.is_some()
    }

    /// Whether this fragment expects a successor in its chain.
    pub fn has_next(&self) -> bool {
        self.next_loc.is_some()
    }

    pub fn prev_loc(&self) -> Option<&Location> {
        self.prev_loc.as_ref()
    }

    pub fn next_loc(&self) -> Option<&Location> {
        self.next_loc.as_ref()
    }

    pub fn set_prev_loc(&mut self, loc: Location) {
        self.prev_loc = Some(loc);
    }

    pub fn set_next_loc(&mut self, loc: Location) {
        self.next_loc = Some(loc);
    }

    pub fn payload(&self) -> Option<&SpannerElement> {
        self.payload.as_ref()
    }

    pub fn take_payload(&mut self) -> Option<SpannerElement> {
        self.payload.take()
    }

    /// Whether `current` has been resolved from the read context.
    pub fn updated(&self) -> bool {
        self.updated
    }

    pub fn set_updated(&mut self, updated: bool) {
        self.updated = updated;
    }

    /// A fragment is marked unusable when its payload was malformed; it
    /// stays in the working set so the rest of its chain can be reported
    /// as broken, but it never takes part in matching.
    pub fn usable(&self) -> bool {
        self.usable
    }

    pub fn mark_unusable(&mut self) {
        self.usable = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            ConnectorKind::Tie,
            ConnectorKind::Slur,
            ConnectorKind::Hairpin,
            ConnectorKind::Ottava,
            ConnectorKind::Pedal,
            ConnectorKind::Trill,
            ConnectorKind::TextLine,
            ConnectorKind::Glissando,
        ] {
            assert_eq!(ConnectorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ConnectorKind::from_name("Banana"), None);
    }

    #[test]
    fn degenerate_fragment_has_no_neighbours() {
        let frag = ConnectorFragment::new(ConnectorKind::Slur, Location::absolute());
        assert!(!frag.has_previous());
        assert!(!frag.has_next());
        assert!(frag.updated());
        assert!(frag.usable());
    }

    #[test]
    fn relative_current_is_not_updated() {
        let frag = ConnectorFragment::new(ConnectorKind::Tie, Location::relative());
        assert!(!frag.updated());
    }
}
