//! Persisted conversation pieces and the chat-level sheet context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::generate_random_string;
use crate::sheet::Sheet;

/// Row-major matrix of cell uids defining a sheet's layout.
pub type HashGrid = Vec<Vec<String>>;

/// One persisted unit of conversation state.
///
/// A piece is a chat message. When it carries a sheet snapshot,
/// `hash_sheets` maps each sheet uid to the uid grid at that point in the
/// conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChatPiece {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub mes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub swipe_id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_sheets: Option<BTreeMap<String, HashGrid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_step_links: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_step_waiting: Option<BTreeMap<String, bool>>,
}

impl ChatPiece {
    pub fn new(name: impl Into<String>, is_user: bool, mes: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_user,
            mes: mes.into(),
            ..Self::default()
        }
    }

    /// True when the piece carries at least one sheet grid.
    pub fn has_sheets(&self) -> bool {
        self.hash_sheets.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// Uid of this piece, assigning a 22 character one on first use.
    pub fn ensure_uid(&mut self) -> String {
        self.uid
            .get_or_insert_with(|| generate_random_string(22))
            .clone()
    }

    /// Identifier of the currently selected swipe of this piece.
    ///
    /// Initialises the swipe tracking maps lazily; a new swipe starts with
    /// no links and in the waiting state.
    pub fn swipe_uid(&mut self) -> String {
        let swipe_uid = format!("{}_{}", self.ensure_uid(), self.swipe_id);
        self.two_step_links
            .get_or_insert_with(BTreeMap::new)
            .entry(swipe_uid.clone())
            .or_default();
        self.two_step_waiting
            .get_or_insert_with(BTreeMap::new)
            .entry(swipe_uid.clone())
            .or_insert(true);
        swipe_uid
    }

    pub fn mark_waiting(&mut self, swipe_uid: &str) {
        self.two_step_waiting
            .get_or_insert_with(BTreeMap::new)
            .insert(swipe_uid.to_string(), true);
    }

    /// Record that the current swipe has been processed by `target_swipe_uid`.
    pub fn link_executed(&mut self, target_swipe_uid: &str) {
        let own = self.swipe_uid();
        if let Some(links) = self.two_step_links.as_mut().and_then(|l| l.get_mut(&own)) {
            if !links.iter().any(|l| l == target_swipe_uid) {
                links.push(target_swipe_uid.to_string());
            }
        }
        if let Some(waiting) = self.two_step_waiting.as_mut() {
            waiting.insert(own, false);
        }
    }

    /// Whether the current swipe was already processed by `target_swipe_uid`.
    pub fn is_executed_by(&mut self, target_swipe_uid: &str) -> bool {
        let own = self.swipe_uid();
        self.two_step_links
            .as_ref()
            .and_then(|l| l.get(&own))
            .is_some_and(|links| links.iter().any(|l| l == target_swipe_uid))
    }

    /// Drop all sheet state from this piece.
    pub fn clear_sheet_state(&mut self) {
        self.hash_sheets = None;
        self.two_step_links = None;
        self.two_step_waiting = None;
    }
}

/// Chat-level sheet metadata: every sheet definition with its cell store.
///
/// Pieces only carry uid grids; cell values live here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SheetContext {
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

impl SheetContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, uid: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.uid == uid)
    }

    /// Insert or replace the record for `sheet`, keeping context order.
    pub fn upsert(&mut self, sheet: &Sheet) {
        match self.sheets.iter_mut().find(|s| s.uid == sheet.uid) {
            Some(existing) => *existing = sheet.clone(),
            None => self.sheets.push(sheet.clone()),
        }
    }

    /// Reconstruct fresh sheets for every grid carried by `piece`, in context order.
    pub fn hash_sheets_to_sheets(&self, piece: &ChatPiece) -> Vec<Sheet> {
        let Some(grids) = piece.hash_sheets.as_ref() else {
            return Vec::new();
        };
        self.sheets
            .iter()
            .filter_map(|record| {
                grids
                    .get(&record.uid)
                    .map(|grid| record.with_grid(grid.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swipe_uid_initialises_tracking() {
        let mut piece = ChatPiece::new("bot", false, "hi");
        piece.swipe_id = 2;
        let swipe = piece.swipe_uid();
        let uid = piece.uid.clone().unwrap();
        assert_eq!(uid.len(), 22);
        assert_eq!(swipe, format!("{}_2", uid));
        assert_eq!(piece.two_step_waiting.as_ref().unwrap()[&swipe], true);
        assert!(piece.two_step_links.as_ref().unwrap()[&swipe].is_empty());
    }

    #[test]
    fn test_link_executed_is_idempotent() {
        let mut piece = ChatPiece::new("bot", false, "hi");
        piece.link_executed("other_0");
        piece.link_executed("other_0");
        assert!(piece.is_executed_by("other_0"));
        let own = piece.swipe_uid();
        assert_eq!(piece.two_step_links.as_ref().unwrap()[&own].len(), 1);
        assert_eq!(piece.two_step_waiting.as_ref().unwrap()[&own], false);
    }

    #[test]
    fn test_clear_sheet_state() {
        let mut piece = ChatPiece::new("bot", false, "hi");
        piece.hash_sheets = Some(BTreeMap::from([("s".to_string(), vec![])]));
        piece.swipe_uid();
        piece.clear_sheet_state();
        assert!(piece.hash_sheets.is_none());
        assert!(piece.two_step_links.is_none());
        assert!(piece.two_step_waiting.is_none());
    }

    #[test]
    fn test_hash_sheets_to_sheets_follows_context_order() {
        let mut ctx = SheetContext::new();
        let a = Sheet::new_sheet(2, 2);
        let b = Sheet::new_sheet(3, 1);
        ctx.upsert(&a);
        ctx.upsert(&b);

        let mut piece = ChatPiece::new("bot", false, "hi");
        b.save(&mut ctx, Some(&mut piece));
        a.save(&mut ctx, Some(&mut piece));

        let sheets = ctx.hash_sheets_to_sheets(&piece);
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].uid, a.uid);
        assert_eq!(sheets[1].uid, b.uid);
    }
}
