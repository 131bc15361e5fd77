//! Resolution engine: stitches connector fragments into chains
//!
//! Fragments arrive in arbitrary order from the reader, are held in an
//! arena, and are greedily matched pairwise by the location distance
//! metric. Links between fragments are arena indices, so a corrupt input
//! can at worst produce a cycle (which the chain walks detect), never a
//! dangling reference.
//!
//! Lifecycle per fragment: submitted -> promoted into the working set at
//! the next reconciliation -> linked -> delivered once its whole chain is
//! finished. Anything still unresolved at end of document is reported as
//! broken, repaired best-effort, or dropped with a diagnostic. A document
//! load never fails because of connector problems.

use std::collections::HashSet;

use thiserror::Error;

use crate::diagnostics::{DiagnosticMark, DiagnosticSeverity, Diagnostics};
use crate::fragment::{ConnectorFragment, ConnectorKind, SpannerElement};
use crate::location::{self, Location};

/// Index of a fragment in the engine's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FragmentId(u32);

impl FragmentId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Error returned by a receiver's install callback. Receiver errors are
/// logged by the engine, never propagated as engine failures.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct InstallError(pub String);

/// The document-model entity that takes ownership of a reconstructed
/// connector. Called once per chain element, in chain order; the payload
/// is present only on the chain-first element.
pub trait ConnectorReceiver {
    fn install(
        &mut self,
        kind: ConnectorKind,
        payload: Option<SpannerElement>,
        location: &Location,
    ) -> Result<(), InstallError>;
}

struct Slot {
    frag: ConnectorFragment,
    prev: Option<FragmentId>,
    next: Option<FragmentId>,
}

/// Holds the working set of unresolved fragments for one document load.
///
/// Not reentrant; one engine per load operation. Dropping the engine
/// releases all undelivered fragments and payloads.
#[derive(Default)]
pub struct ResolutionEngine {
    slots: Vec<Slot>,
    pending: Vec<FragmentId>,
    working: Vec<FragmentId>,
    diagnostics: Diagnostics,
}

impl ResolutionEngine {
    pub fn new() -> Self {
        ResolutionEngine {
            slots: Vec::new(),
            pending: Vec::new(),
            working: Vec::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    fn slot(&self, id: FragmentId) -> &Slot {
        &self.slots[id.0 as usize]
    }

    fn slot_mut(&mut self, id: FragmentId) -> &mut Slot {
        &mut self.slots[id.0 as usize]
    }

    pub fn fragment(&self, id: FragmentId) -> &ConnectorFragment {
        &self.slot(id).frag
    }

    pub fn prev_link(&self, id: FragmentId) -> Option<FragmentId> {
        self.slot(id).prev
    }

    pub fn next_link(&self, id: FragmentId) -> Option<FragmentId> {
        self.slot(id).next
    }

    /// The load report accumulated so far.
    pub fn report(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Number of fragments not yet delivered or dropped.
    pub fn unresolved(&self) -> usize {
        self.pending.len() + self.working.len()
    }

    /// Enqueues a newly-parsed fragment. Never fails; malformed fragments
    /// are still enqueued and handled at reconciliation/finalization.
    pub fn submit(&mut self, fragment: ConnectorFragment) -> FragmentId {
        let id = FragmentId(self.slots.len() as u32);
        self.slots.push(Slot {
            frag: fragment,
            prev: None,
            next: None,
        });
        self.pending.push(id);
        id
    }

    /// Walks `prev` links to the chain head. Returns `None` when the walk
    /// revisits the starting fragment: a cycle is a corruption signal, not
    /// a valid chain.
    pub fn find_first(&self, id: FragmentId) -> Option<FragmentId> {
        let mut i = id;
        while let Some(p) = self.slot(i).prev {
            i = p;
            if i == id {
                log::warn!("find_first: circular connector chain at fragment {}", id.0);
                return None;
            }
        }
        Some(i)
    }

    /// Walks `next` links to the chain tail; `None` on a cycle.
    pub fn find_last(&self, id: FragmentId) -> Option<FragmentId> {
        let mut i = id;
        while let Some(n) = self.slot(i).next {
            i = n;
            if i == id {
                log::warn!("find_last: circular connector chain at fragment {}", id.0);
                return None;
            }
        }
        Some(i)
    }

    /// True iff the chain head declares no outstanding previous link.
    pub fn finished_left(&self, id: FragmentId) -> bool {
        match self.find_first(id) {
            Some(first) => !self.slot(first).frag.has_previous(),
            None => false,
        }
    }

    /// True iff the chain tail declares no outstanding next link.
    pub fn finished_right(&self, id: FragmentId) -> bool {
        match self.find_last(id) {
            Some(last) => !self.slot(last).frag.has_next(),
            None => false,
        }
    }

    pub fn finished(&self, id: FragmentId) -> bool {
        self.finished_left(id) && self.finished_right(id)
    }

    /// Links two fragments when exactly one ordered location match holds.
    /// Returns false on kind mismatch, occupied link slots, or location
    /// disagreement; a second attempt on an already-linked pair is a no-op
    /// returning false.
    pub fn connect(&mut self, a: FragmentId, b: FragmentId) -> bool {
        if a == b {
            return false;
        }
        let fa = &self.slot(a).frag;
        let fb = &self.slot(b).frag;
        if fa.kind() != fb.kind() {
            return false;
        }
        if fa.has_previous()
            && self.slot(a).prev.is_none()
            && fb.has_next()
            && self.slot(b).next.is_none()
            && fa.prev_loc() == Some(fb.current())
            && Some(fa.current()) == fb.next_loc()
        {
            self.slot_mut(a).prev = Some(b);
            self.slot_mut(b).next = Some(a);
            return true;
        }
        let fa = &self.slot(a).frag;
        let fb = &self.slot(b).frag;
        if fa.has_next()
            && self.slot(a).next.is_none()
            && fb.has_previous()
            && self.slot(b).prev.is_none()
            && fa.next_loc() == Some(fb.current())
            && Some(fa.current()) == fb.prev_loc()
        {
            self.slot_mut(a).next = Some(b);
            self.slot_mut(b).prev = Some(a);
            return true;
        }
        false
    }

    /// Unconditional link installation (`a` before `b`), bypassing the
    /// location match. Last-resort repair path for otherwise-unresolvable
    /// dangling fragments; never used during normal reconciliation.
    pub fn force_connect(&mut self, a: FragmentId, b: FragmentId) {
        if a == b {
            return;
        }
        self.slot_mut(a).next = Some(b);
        self.slot_mut(b).prev = Some(a);
    }

    /// Distance score for the ordered pairing `first` before `second`.
    /// The declared relative offsets must agree (the next offset of
    /// `first` equals the prev offset of `second`, computed with inverted
    /// operand order to get equal signs); the score is then the raw
    /// distance between the expected and actual endpoint.
    fn ordered_connection_distance(&self, first: FragmentId, second: FragmentId) -> Option<i64> {
        let f1 = &self.slot(first).frag;
        let f2 = &self.slot(second).frag;
        let next_loc = *f1.next_loc()?;
        let prev_loc = *f2.prev_loc()?;
        let first_next = next_loc.to_relative(f1.current()).ok()?;
        let second_prev = f2.current().to_relative(&prev_loc).ok()?;
        if first_next == second_prev {
            Some(location::distance(&next_loc, f2.current()))
        } else {
            None
        }
    }

    /// Likelihood score that two fragments should be connected. `None`
    /// when they cannot be; otherwise the sign encodes order: negative
    /// means `b` precedes `a`, non-negative means `a` precedes `b`. A
    /// score of 0 means the pair can be readily connected via
    /// [`connect`](Self::connect).
    pub fn connection_distance(&self, a: FragmentId, b: FragmentId) -> Option<i64> {
        if a == b {
            return None;
        }
        let fa = &self.slot(a).frag;
        let fb = &self.slot(b).frag;
        if fa.kind() != fb.kind() || !fa.usable() || !fb.usable() {
            return None;
        }
        let mut dist_ab = None;
        if fa.has_next()
            && self.slot(a).next.is_none()
            && fb.has_previous()
            && self.slot(b).prev.is_none()
        {
            dist_ab = self.ordered_connection_distance(a, b);
        }
        let fa = &self.slot(a).frag;
        let fb = &self.slot(b).frag;
        let mut dist_ba = None;
        if fa.has_previous()
            && self.slot(a).prev.is_none()
            && fb.has_next()
            && self.slot(b).next.is_none()
        {
            dist_ba = self.ordered_connection_distance(b, a);
        }
        match (dist_ab, dist_ba) {
            (None, None) => None,
            (Some(ab), None) => Some(ab),
            (None, Some(ba)) => Some(-ba),
            (Some(ab), Some(ba)) => {
                if ba < ab {
                    Some(-ba)
                } else {
                    Some(ab)
                }
            }
        }
    }

    /// Detaches and returns the chain's payload without delivering it
    /// (salvage path). Searches from the chain head; on a circular chain,
    /// scans from `id` toward the root, bounded by coming back around.
    pub fn release_payload(&mut self, id: FragmentId) -> Option<SpannerElement> {
        match self.find_first(id) {
            Some(first) => self.slot_mut(first).frag.take_payload(),
            None => {
                let mut found = None;
                let mut cur = id;
                loop {
                    if let Some(p) = self.slot_mut(cur).frag.take_payload() {
                        found = Some(p);
                    }
                    match self.slot(cur).prev {
                        Some(p) if p != id => cur = p,
                        _ => break,
                    }
                }
                found
            }
        }
    }

    /// Moves newly-submitted fragments into the working set, resolving
    /// their declared endpoint locations to absolute against the current
    /// location.
    fn promote_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for id in pending {
            self.update_fragment(id);
            self.working.push(id);
        }
    }

    fn update_fragment(&mut self, id: FragmentId) {
        let frag = &self.slot(id).frag;
        let current = *frag.current();
        let mut failed = !frag.updated();

        if !failed {
            let prev = frag.prev_loc().copied();
            let next = frag.next_loc().copied();
            let slot = self.slot_mut(id);
            if let Some(loc) = prev.filter(|l| l.is_relative()) {
                match loc.to_absolute(&current) {
                    Ok(abs) => slot.frag.set_prev_loc(abs),
                    Err(_) => failed = true,
                }
            }
            if let Some(loc) = next.filter(|l| l.is_relative()) {
                match loc.to_absolute(&current) {
                    Ok(abs) => slot.frag.set_next_loc(abs),
                    Err(_) => failed = true,
                }
            }
        }

        if failed {
            let frag = &mut self.slot_mut(id).frag;
            frag.mark_unusable();
            let (measure, track, kind) = (current.measure(), current.track(), frag.kind());
            log::warn!(
                "fragment {} ({}) has an unresolvable location, chain will be broken",
                id.0,
                kind.name()
            );
            self.diagnostics.add(DiagnosticMark::new(
                measure,
                track,
                DiagnosticSeverity::Warning,
                "connector_unresolvable_location",
                format!("{} fragment location could not be resolved", kind.name()),
            ));
        }
    }

    /// Delivers every finished chain in the working set, front-to-back,
    /// and removes its fragments. Receiver errors are logged, not
    /// propagated.
    fn deliver_finished(&mut self, receiver: &mut dyn ConnectorReceiver) {
        let mut delivered: HashSet<FragmentId> = HashSet::new();
        let ids: Vec<FragmentId> = self.working.clone();
        for id in ids {
            if delivered.contains(&id) || !self.finished(id) {
                continue;
            }
            let first = match self.find_first(id) {
                Some(f) => f,
                None => continue,
            };
            // a chain containing a malformed fragment counts as broken
            let mut probe = Some(first);
            let mut chain_usable = true;
            while let Some(c) = probe {
                if !self.slot(c).frag.usable() {
                    chain_usable = false;
                    break;
                }
                probe = self.slot(c).next;
            }
            if !chain_usable {
                continue;
            }
            let mut cur = Some(first);
            while let Some(c) = cur {
                let payload = self.slot_mut(c).frag.take_payload();
                let kind = self.slot(c).frag.kind();
                let loc = *self.slot(c).frag.current();
                if let Err(err) = receiver.install(kind, payload, &loc) {
                    log::warn!("receiver failed to install {} fragment: {}", kind.name(), err);
                }
                delivered.insert(c);
                cur = self.slot(c).next;
            }
        }
        self.working.retain(|id| !delivered.contains(id));
    }

    /// One reconciliation pass: promote pending fragments, then greedily
    /// link the minimum-distance readily-connectable pair until none
    /// remains, delivering finished chains as they appear. Ties are broken
    /// by submission order, so resolution is deterministic.
    pub fn reconcile(&mut self, receiver: &mut dyn ConnectorReceiver) {
        self.promote_pending();
        self.deliver_finished(receiver);
        loop {
            let mut best: Option<(i64, FragmentId, FragmentId)> = None;
            for i in 0..self.working.len() {
                for j in (i + 1)..self.working.len() {
                    let (a, b) = (self.working[i], self.working[j]);
                    if let Some(d) = self.connection_distance(a, b) {
                        let (key, first, second) = if d < 0 { (-d, b, a) } else { (d, a, b) };
                        let better = match best {
                            None => true,
                            Some((bk, _, _)) => key < bk,
                        };
                        if better {
                            best = Some((key, first, second));
                        }
                    }
                }
            }
            // A non-zero best distance means no pair matches exactly;
            // leave those for a later pass or for end-of-document repair.
            match best {
                Some((0, first, second)) => {
                    if !self.connect(first, second) {
                        break;
                    }
                    self.deliver_finished(receiver);
                }
                _ => break,
            }
        }
    }

    /// Raw-distance score for forcing `a`'s open next end onto `b`'s open
    /// previous end. Unlike `connection_distance` this ignores the
    /// declared relative offsets; it only requires matching kind, open
    /// slots on the right sides, and that the two ends belong to
    /// different chains (closing a chain onto itself would create a
    /// cycle, not a repair).
    fn repair_distance(&self, a: FragmentId, b: FragmentId) -> Option<i64> {
        if a == b {
            return None;
        }
        let fa = &self.slot(a).frag;
        let fb = &self.slot(b).frag;
        if fa.kind() != fb.kind() || !fa.usable() || !fb.usable() {
            return None;
        }
        if !fa.has_next() || self.slot(a).next.is_some() {
            return None;
        }
        if !fb.has_previous() || self.slot(b).prev.is_some() {
            return None;
        }
        if self.find_first(a) == self.find_first(b) {
            return None;
        }
        Some(location::distance(fa.next_loc()?, fb.current()))
    }

    /// End-of-document pass: one last reconcile, then broken-chain
    /// handling. Each broken chain is reported; the closest compatible
    /// open ends are force-connected best-effort; whatever remains
    /// unfinished is dropped with a diagnostic. The document load itself
    /// never fails here.
    pub fn finalize(&mut self, receiver: &mut dyn ConnectorReceiver) {
        self.reconcile(receiver);
        if self.working.is_empty() {
            return;
        }
        log::warn!(
            "{} connector fragment(s) unresolved at end of document",
            self.working.len()
        );
        self.report_broken_chains();
        self.repair_broken_chains();
        self.deliver_finished(receiver);
        self.drop_leftovers();
    }

    fn report_broken_chains(&mut self) {
        let mut seen: HashSet<FragmentId> = HashSet::new();
        let ids: Vec<FragmentId> = self.working.clone();
        for id in ids {
            let Some(head) = self.find_first(id) else {
                continue; // cycles are reported when dropped
            };
            if !seen.insert(head) {
                continue;
            }
            let frag = &self.slot(head).frag;
            let (kind, loc) = (frag.kind(), *frag.current());
            self.diagnostics.add(DiagnosticMark::new(
                loc.measure(),
                loc.track(),
                DiagnosticSeverity::Warning,
                "connector_broken",
                format!("broken {} chain at end of document", kind.name()),
            ));
        }
    }

    fn repair_broken_chains(&mut self) {
        let mut pairs: Vec<(i64, FragmentId, FragmentId)> = Vec::new();
        for &a in &self.working {
            for &b in &self.working {
                if let Some(d) = self.repair_distance(a, b) {
                    pairs.push((d, a, b));
                }
            }
        }
        pairs.sort_by_key(|&(d, a, b)| (d, a.0, b.0));
        for (_, first, second) in pairs {
            if self.slot(first).next.is_some() || self.slot(second).prev.is_some() {
                continue;
            }
            // an earlier forced connection may have merged the two
            // chains; re-check so the merged chain is not closed onto
            // itself
            if self.find_first(first) == self.find_first(second) {
                continue;
            }
            let kind = self.slot(first).frag.kind();
            let loc = *self.slot(first).frag.current();
            log::warn!(
                "force-connecting dangling {} fragments {} -> {}",
                kind.name(),
                first.0,
                second.0
            );
            self.diagnostics.add(DiagnosticMark::new(
                loc.measure(),
                loc.track(),
                DiagnosticSeverity::Warning,
                "connector_forced",
                format!("{} chain reconnected by best-effort repair", kind.name()),
            ));
            self.force_connect(first, second);
        }
    }

    fn drop_leftovers(&mut self) {
        let mut cyclic: HashSet<FragmentId> = HashSet::new();
        let leftovers: Vec<FragmentId> = std::mem::take(&mut self.working);
        for id in leftovers {
            let frag = &self.slot(id).frag;
            let (kind, loc) = (frag.kind(), *frag.current());
            if self.find_first(id).is_none() {
                if cyclic.insert(id) {
                    // mark the rest of the cycle as already reported
                    let mut cur = id;
                    while let Some(n) = self.slot(cur).next {
                        if n == id {
                            break;
                        }
                        cyclic.insert(n);
                        cur = n;
                    }
                    self.diagnostics.add(DiagnosticMark::new(
                        loc.measure(),
                        loc.track(),
                        DiagnosticSeverity::Error,
                        "connector_cycle",
                        format!("circular {} chain discarded", kind.name()),
                    ));
                }
                let _ = self.release_payload(id);
                continue;
            }
            log::warn!("dropping unresolved {} fragment {}", kind.name(), id.0);
            self.diagnostics.add(DiagnosticMark::new(
                loc.measure(),
                loc.track(),
                DiagnosticSeverity::Warning,
                "connector_dropped",
                format!("{} omitted from the loaded document", kind.name()),
            ));
            let _ = self.slot_mut(id).frag.take_payload();
        }
    }
}
