//! Context merge engine.
//!
//! Decides whether a turn refines the unresolved topic (CONTINUE) or starts
//! a new one (RESET). Comparison is exact on raw values, before any merge.

use apteka_core::types::{SlotField, SlotSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Continue,
    Reset,
}

/// Fields whose mismatch alone starts a new topic.
const STRONG_FIELDS: [SlotField; 3] = [SlotField::Name, SlotField::Number, SlotField::City];

fn differs(current: &SlotSet, extracted: &SlotSet, field: SlotField) -> bool {
    let (old, new) = (current.get(field), extracted.get(field));
    !old.is_empty() && !new.is_empty() && old != new
}

/// True when `extracted` continues the topic held in `current`.
///
/// A street mismatch only counts when the turn also names a city or house
/// number; on its own it is too weak a signal.
pub fn is_continuation(current: Option<&SlotSet>, extracted: &SlotSet) -> bool {
    let Some(current) = current else {
        return false;
    };

    if STRONG_FIELDS
        .iter()
        .any(|f| differs(current, extracted, *f))
    {
        return false;
    }

    let street_anchor = extracted.has(SlotField::City) || extracted.has(SlotField::HouseNumber);
    if street_anchor && differs(current, extracted, SlotField::Street) {
        return false;
    }

    true
}

/// Produce the attribute set that drives retrieval for this turn.
///
/// On CONTINUE, empty fields of `extracted` are filled from `current`. On
/// RESET the result is `extracted` alone.
pub fn merge_context(current: Option<&SlotSet>, extracted: &SlotSet) -> (SlotSet, MergeDecision) {
    match current {
        Some(ctx) if is_continuation(Some(ctx), extracted) => {
            let mut merged = extracted.clone();
            for field in SlotField::ALL {
                if !merged.has(field) {
                    merged.set(field, ctx.get(field));
                }
            }
            (merged, MergeDecision::Continue)
        }
        _ => (extracted.clone(), MergeDecision::Reset),
    }
}
