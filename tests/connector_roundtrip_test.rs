//! Round-trip: chains of 1..3 fragments written by the writer are
//! reconstructed by the engine in original order.

use spanchain::{
    read_fragment_str, write_fragment_string, ConnectorFragment, ConnectorKind,
    ConnectorReceiver, Diagnostics, InstallError, Location, Rational, ReadContext,
    ResolutionEngine, SpannerElement,
};

#[derive(Default)]
struct RecordingReceiver {
    installed: Vec<(ConnectorKind, Option<SpannerElement>, Location)>,
}

impl ConnectorReceiver for RecordingReceiver {
    fn install(
        &mut self,
        kind: ConnectorKind,
        payload: Option<SpannerElement>,
        location: &Location,
    ) -> Result<(), InstallError> {
        self.installed.push((kind, payload, *location));
        Ok(())
    }
}

fn loc(measure: i32, track: i32) -> Location {
    Location::absolute()
        .with_measure(measure)
        .with_frac(Rational::new(0, 1))
        .with_track(track)
        .with_note(0)
        .with_grace(0)
}

fn ctx_at(measure: i32, track: i32) -> ReadContext {
    let mut ctx = ReadContext::new();
    ctx.set_measure_index(measure);
    ctx.set_track(track);
    ctx
}

/// Builds a chain of `n` Slur fragments one measure apart, serializes
/// each, reads them back at the matching positions and resolves them.
fn round_trip(n: usize) -> (ResolutionEngine, RecordingReceiver) {
    let mut fragments = Vec::new();
    for i in 0..n {
        let at = loc(i as i32 + 1, 0);
        let mut frag = ConnectorFragment::new(ConnectorKind::Slur, at);
        if i > 0 {
            frag = frag.with_prev(loc(i as i32, 0));
        } else {
            frag = frag.with_payload(
                SpannerElement::new(ConnectorKind::Slur, 0).with_property("up", "1"),
            );
        }
        if i + 1 < n {
            frag = frag.with_next(loc(i as i32 + 2, 0));
        }
        fragments.push(frag);
    }

    let mut engine = ResolutionEngine::new();
    let mut diags = Diagnostics::new();
    for (i, frag) in fragments.iter().enumerate() {
        let xml = write_fragment_string(frag).unwrap();
        let ctx = ctx_at(i as i32 + 1, 0);
        let parsed = read_fragment_str(&xml, &ctx, &mut diags).unwrap();
        engine.submit(parsed);
    }
    assert!(diags.is_empty());

    let mut rx = RecordingReceiver::default();
    engine.finalize(&mut rx);
    (engine, rx)
}

#[test]
fn round_trip_single_fragment() {
    let (engine, rx) = round_trip(1);
    assert_eq!(rx.installed.len(), 1);
    assert!(rx.installed[0].1.is_some());
    assert!(engine.report().is_empty());
}

#[test]
fn round_trip_two_fragments() {
    let (engine, rx) = round_trip(2);
    assert_eq!(rx.installed.len(), 2);
    assert_eq!(rx.installed[0].2.measure(), 1);
    assert_eq!(rx.installed[1].2.measure(), 2);
    assert!(rx.installed[0].1.is_some());
    assert!(rx.installed[1].1.is_none());
    assert!(engine.report().is_empty());
}

#[test]
fn round_trip_three_fragments() {
    let (engine, rx) = round_trip(3);
    assert_eq!(rx.installed.len(), 3);
    let measures: Vec<i32> = rx.installed.iter().map(|(_, _, l)| l.measure()).collect();
    assert_eq!(measures, vec![1, 2, 3]);
    assert!(rx.installed[0].1.is_some());
    assert!(rx.installed[1].1.is_none());
    assert!(rx.installed[2].1.is_none());
    assert!(engine.report().is_empty());
}

#[test]
fn fragments_resolve_regardless_of_submission_order() {
    // same 3-fragment chain, submitted tail first
    let head = ConnectorFragment::new(ConnectorKind::Ottava, loc(1, 0))
        .with_next(loc(2, 0))
        .with_payload(SpannerElement::new(ConnectorKind::Ottava, 0));
    let middle = ConnectorFragment::new(ConnectorKind::Ottava, loc(2, 0))
        .with_prev(loc(1, 0))
        .with_next(loc(3, 0));
    let tail = ConnectorFragment::new(ConnectorKind::Ottava, loc(3, 0)).with_prev(loc(2, 0));

    let mut engine = ResolutionEngine::new();
    engine.submit(tail);
    engine.submit(middle);
    engine.submit(head);
    let mut rx = RecordingReceiver::default();
    engine.finalize(&mut rx);

    let measures: Vec<i32> = rx.installed.iter().map(|(_, _, l)| l.measure()).collect();
    assert_eq!(measures, vec![1, 2, 3], "delivery is in chain order, not submission order");
}

#[test]
fn payload_properties_survive_the_round_trip() {
    let frag = ConnectorFragment::new(ConnectorKind::Hairpin, loc(4, 2)).with_payload(
        SpannerElement::new(ConnectorKind::Hairpin, 2)
            .with_property("subtype", "1")
            .with_property("placement", "below"),
    );
    let xml = write_fragment_string(&frag).unwrap();
    let mut diags = Diagnostics::new();
    let parsed = read_fragment_str(&xml, &ctx_at(4, 2), &mut diags).unwrap();
    let payload = parsed.payload().unwrap();
    assert_eq!(
        payload.properties,
        vec![
            ("subtype".to_string(), "1".to_string()),
            ("placement".to_string(), "below".to_string()),
        ]
    );
}
