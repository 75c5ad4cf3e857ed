use rand::Rng;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::EngineError;
use crate::models::question::{BankBand, GradeLevel, Subtag};

const BUILTIN_BANK: &str = include_str!("../../data/fallback_bank.json");

#[derive(Debug, Deserialize)]
struct BankEntry {
    band: BankBand,
    subtag: Subtag,
    text: String,
    options: BTreeMap<String, String>,
    correct_answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackItem {
    pub text: String,
    pub options: BTreeMap<String, String>,
    pub correct_answer: String,
}

/// Which step of the widening search produced a fallback item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTier {
    /// Unused item from the requested subtag.
    Requested,
    /// Unused item borrowed from a sibling subtag.
    Sibling,
    /// Every item was used; a repeat is served rather than blocking the test.
    Reused,
}

#[derive(Debug, Clone)]
pub struct FallbackDraw<'a> {
    pub item: &'a FallbackItem,
    pub subtag: Subtag,
    pub tier: DrawTier,
}

/// Static, pre-authored questions keyed by (grade band, subtag).
#[derive(Debug, Clone, Default)]
pub struct FallbackBank {
    items: HashMap<(BankBand, Subtag), Vec<FallbackItem>>,
}

impl FallbackBank {
    pub fn builtin() -> Result<Self, EngineError> {
        Self::from_json(BUILTIN_BANK)
    }

    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let entries: Vec<BankEntry> = serde_json::from_str(raw)
            .map_err(|e| EngineError::InvalidInput(format!("invalid fallback bank: {}", e)))?;

        let mut items: HashMap<(BankBand, Subtag), Vec<FallbackItem>> = HashMap::new();
        for entry in entries {
            items
                .entry((entry.band, entry.subtag))
                .or_default()
                .push(FallbackItem {
                    text: entry.text,
                    options: entry.options,
                    correct_answer: entry.correct_answer,
                });
        }
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items_for(&self, grade: GradeLevel, subtag: Subtag) -> &[FallbackItem] {
        self.items
            .get(&(grade.bank_band(), subtag))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Picks a fallback item for `subtag`, never one whose text is in `excluded`
    /// unless nothing else is left.
    ///
    /// 1. uniform pick among unused items of the requested subtag;
    /// 2. otherwise the first sibling subtag (in [`Subtag::ALL`] order) with unused items;
    /// 3. otherwise a repeat from the requested subtag, or from any subtag if it has none.
    ///
    /// Returns `None` only when the grade band has no items at all.
    pub fn draw<R: Rng>(
        &self,
        grade: GradeLevel,
        subtag: Subtag,
        excluded: &BTreeSet<String>,
        rng: &mut R,
    ) -> Option<FallbackDraw<'_>> {
        let unused = |s: Subtag| -> Vec<&FallbackItem> {
            self.items_for(grade, s)
                .iter()
                .filter(|item| !excluded.contains(&item.text))
                .collect()
        };

        let candidates = unused(subtag);
        if !candidates.is_empty() {
            let item = candidates[rng.random_range(0..candidates.len())];
            return Some(FallbackDraw {
                item,
                subtag,
                tier: DrawTier::Requested,
            });
        }

        for sibling in Subtag::ALL.iter().copied().filter(|s| *s != subtag) {
            let candidates = unused(sibling);
            if !candidates.is_empty() {
                let item = candidates[rng.random_range(0..candidates.len())];
                return Some(FallbackDraw {
                    item,
                    subtag: sibling,
                    tier: DrawTier::Sibling,
                });
            }
        }

        let reuse_from = std::iter::once(subtag)
            .chain(Subtag::ALL.iter().copied())
            .find(|s| !self.items_for(grade, *s).is_empty())?;
        let pool = self.items_for(grade, reuse_from);
        Some(FallbackDraw {
            item: &pool[rng.random_range(0..pool.len())],
            subtag: reuse_from,
            tier: DrawTier::Reused,
        })
    }
}
