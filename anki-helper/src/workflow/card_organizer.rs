//! Card organization
//!
//! Moves cards matching a rule's filter into the rule's target deck. Cards
//! already in the target deck are excluded by the search itself, so a rule
//! that has nothing to do makes no move request.

use crate::config::OrganizationRule;
use crate::error::{PipelineResult, StageContext};
use crate::types::NoteStore;
use std::sync::Arc;
use tracing::info;

/// Search for cards matching `filter` outside `target_deck`
pub fn cards_to_move_filter(rule: &OrganizationRule) -> String {
    format!("-\"deck:{}\" {}", rule.target_deck, rule.filter)
}

/// Applies card organization rules
pub struct CardOrganizer {
    store: Arc<dyn NoteStore>,
}

impl CardOrganizer {
    pub fn new(store: Arc<dyn NoteStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, rules: &[OrganizationRule]) -> PipelineResult<()> {
        if rules.is_empty() {
            return Ok(());
        }

        info!("Applying cards organization rules...");
        for (i, rule) in rules.iter().enumerate() {
            self.apply_rule(rule)
                .await
                .in_stage("apply cards organization rule", i)?;
        }
        info!("Applied {} cards organization rules", rules.len());
        Ok(())
    }

    /// Returns the number of cards moved
    pub async fn apply_rule(&self, rule: &OrganizationRule) -> PipelineResult<usize> {
        let card_ids = self.store.find_cards(&cards_to_move_filter(rule)).await?;
        if card_ids.is_empty() {
            info!("Found no cards to move to deck {:?}", rule.target_deck);
            return Ok(0);
        }

        info!("Moving {} cards to deck {:?}", card_ids.len(), rule.target_deck);
        self.store.change_deck(&rule.target_deck, &card_ids).await?;
        Ok(card_ids.len())
    }
}
