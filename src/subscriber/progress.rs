//! Per-filter delivery watermarks folded into per-domain checkpoints.
//!
//! A domain may only checkpoint a cursor that every one of its filters has
//! passed. Filters progress independently, so the domain cursor is the minimum
//! of their watermarks.

use crate::checkpoint::Cursor;
use crate::domain::Domain;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct FilterMark {
    domain: Domain,
    cursor: Cursor,
    last_tx_id: Option<String>,
    /// Ceiling for a filter holding an envelope that could not be parked.
    pin: Option<Cursor>,
}

/// Domain cursor worth persisting after a watermark moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainProgress {
    pub domain: Domain,
    pub cursor: Cursor,
    pub last_tx_id: Option<String>,
}

#[derive(Debug)]
pub struct WatermarkBoard {
    marks: Mutex<Vec<FilterMark>>,
}

impl WatermarkBoard {
    /// Filter `i` belongs to `domains[i]` and starts at that domain's cursor.
    pub fn new(domains: &[Domain], start: impl Fn(Domain) -> Cursor) -> Self {
        let marks = domains
            .iter()
            .map(|domain| FilterMark {
                domain: *domain,
                cursor: start(*domain),
                last_tx_id: None,
                pin: None,
            })
            .collect();
        Self {
            marks: Mutex::new(marks),
        }
    }

    /// Move filter `index` forward to `cursor` and return its domain's minimum.
    pub fn advance(
        &self,
        index: usize,
        cursor: Cursor,
        last_tx_id: Option<String>,
    ) -> Option<DomainProgress> {
        let mut marks = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        let mark = marks.get_mut(index)?;

        let target = match mark.pin {
            Some(pin) => cursor.min(pin),
            None => cursor,
        };
        if target > mark.cursor {
            mark.cursor = target;
            if last_tx_id.is_some() {
                mark.last_tx_id = last_tx_id;
            }
        }

        let domain = mark.domain;
        domain_minimum(&marks, domain)
    }

    /// Hold filter `index` at `cursor` for the rest of the run.
    pub fn pin(&self, index: usize, cursor: Cursor) {
        let mut marks = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mark) = marks.get_mut(index) {
            let pin = mark.pin.map_or(cursor, |p| p.min(cursor));
            mark.pin = Some(pin);
            mark.cursor = mark.cursor.min(pin);
        }
    }

    pub fn is_pinned(&self, index: usize) -> bool {
        let marks = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        marks.get(index).map_or(false, |m| m.pin.is_some())
    }

    pub fn domain_cursor(&self, domain: Domain) -> Option<Cursor> {
        let marks = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        domain_minimum(&marks, domain).map(|p| p.cursor)
    }
}

fn domain_minimum(marks: &[FilterMark], domain: Domain) -> Option<DomainProgress> {
    marks
        .iter()
        .filter(|m| m.domain == domain)
        .min_by_key(|m| m.cursor)
        .map(|m| DomainProgress {
            domain,
            cursor: m.cursor,
            last_tx_id: m.last_tx_id.clone(),
        })
}
