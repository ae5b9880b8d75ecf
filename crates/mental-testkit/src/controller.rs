//! Reference controllers
//!
//! Each controller records the hooks it sees as [`ControllerEvent`]s so tests
//! can compare what every peer was told.

use mental_protocol::{CardIndex, CardValue, Controller, ControllerError, PlayerIndex};
use serde_json::Value;
use std::collections::BTreeMap;

/// A hook call observed by a controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// `draw` was reported
    Draw {
        /// Drawing player
        player: PlayerIndex,
        /// Slot drawn
        card: CardIndex,
        /// Value, known only to the drawer
        value: Option<CardValue>,
    },
    /// `open` was reported
    Open {
        /// Opening player
        player: PlayerIndex,
        /// Slot opened
        card: CardIndex,
        /// Revealed value
        value: CardValue,
    },
    /// `update` was applied
    Update {
        /// Updating player
        player: PlayerIndex,
        /// The delta
        info: Value,
    },
}

fn opened_cards(events: &[ControllerEvent]) -> BTreeMap<CardIndex, CardValue> {
    events
        .iter()
        .filter_map(|event| match event {
            ControllerEvent::Open { card, value, .. } => Some((*card, *value)),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Permissive
// ============================================================================

/// Allows every move.
#[derive(Debug, Default)]
pub struct PermissiveController {
    events: Vec<ControllerEvent>,
}

impl PermissiveController {
    /// Everything reported so far, in order.
    pub fn events(&self) -> &[ControllerEvent] {
        &self.events
    }

    /// Opened cards by slot.
    pub fn opened(&self) -> BTreeMap<CardIndex, CardValue> {
        opened_cards(&self.events)
    }

    /// Applied updates, in order.
    pub fn updates(&self) -> Vec<(PlayerIndex, Value)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ControllerEvent::Update { player, info } => Some((*player, info.clone())),
                _ => None,
            })
            .collect()
    }
}

impl Controller for PermissiveController {
    fn validate_draw(&self, _: PlayerIndex, _: CardIndex) -> Result<(), ControllerError> {
        Ok(())
    }

    fn draw(
        &mut self,
        player: PlayerIndex,
        card: CardIndex,
        value: Option<CardValue>,
    ) -> Result<(), ControllerError> {
        self.events.push(ControllerEvent::Draw { player, card, value });
        Ok(())
    }

    fn validate_open(&self, _: PlayerIndex, _: CardIndex) -> Result<(), ControllerError> {
        Ok(())
    }

    fn open(
        &mut self,
        player: PlayerIndex,
        card: CardIndex,
        value: CardValue,
    ) -> Result<(), ControllerError> {
        self.events.push(ControllerEvent::Open { player, card, value });
        Ok(())
    }

    fn validate_update(&self, _: &Value, _: PlayerIndex) -> Result<(), ControllerError> {
        Ok(())
    }

    fn update(&mut self, info: &Value, player: PlayerIndex) -> Result<(), ControllerError> {
        self.events.push(ControllerEvent::Update {
            player,
            info: info.clone(),
        });
        Ok(())
    }
}

// ============================================================================
// Table
// ============================================================================

/// What a table controller knows about one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    /// Player holding the card
    pub owner: Option<PlayerIndex>,
    /// Value, if known to this peer
    pub value: Option<CardValue>,
    /// Whether the card is face up
    pub open: bool,
}

/// Enforces card ownership: a drawn card belongs to its drawer, only the
/// owner can open it, and face-up cards cannot be drawn or opened again.
/// Updates are not supported.
#[derive(Debug)]
pub struct TableController {
    slots: Vec<Slot>,
    events: Vec<ControllerEvent>,
}

impl TableController {
    /// A table for `card_count` slots.
    pub fn new(card_count: usize) -> Self {
        Self {
            slots: vec![Slot::default(); card_count],
            events: Vec::new(),
        }
    }

    /// Slot state.
    pub fn slot(&self, card: CardIndex) -> Option<&Slot> {
        self.slots.get(card)
    }

    /// Everything reported so far, in order.
    pub fn events(&self) -> &[ControllerEvent] {
        &self.events
    }

    /// Opened cards by slot.
    pub fn opened(&self) -> BTreeMap<CardIndex, CardValue> {
        opened_cards(&self.events)
    }

    fn get(&self, card: CardIndex) -> Result<&Slot, ControllerError> {
        self.slots
            .get(card)
            .ok_or_else(|| ControllerError::new(format!("no card at slot {card}")))
    }

    fn get_mut(&mut self, card: CardIndex) -> Result<&mut Slot, ControllerError> {
        self.slots
            .get_mut(card)
            .ok_or_else(|| ControllerError::new(format!("no card at slot {card}")))
    }
}

impl Controller for TableController {
    fn validate_draw(&self, _: PlayerIndex, card: CardIndex) -> Result<(), ControllerError> {
        let slot = self.get(card)?;
        if slot.owner.is_some() {
            return Err(ControllerError::new("can't draw other's card"));
        }
        if slot.open {
            return Err(ControllerError::new("can't draw open card"));
        }
        Ok(())
    }

    fn draw(
        &mut self,
        player: PlayerIndex,
        card: CardIndex,
        value: Option<CardValue>,
    ) -> Result<(), ControllerError> {
        let slot = self.get_mut(card)?;
        slot.owner = Some(player);
        slot.value = value;
        self.events.push(ControllerEvent::Draw { player, card, value });
        Ok(())
    }

    fn validate_open(&self, player: PlayerIndex, card: CardIndex) -> Result<(), ControllerError> {
        let slot = self.get(card)?;
        if slot.owner.is_some_and(|owner| owner != player) {
            return Err(ControllerError::new("can't open other's card"));
        }
        if slot.open {
            return Err(ControllerError::new("can't open already open card"));
        }
        Ok(())
    }

    fn open(
        &mut self,
        player: PlayerIndex,
        card: CardIndex,
        value: CardValue,
    ) -> Result<(), ControllerError> {
        let slot = self.get_mut(card)?;
        slot.open = true;
        slot.value = Some(value);
        self.events.push(ControllerEvent::Open { player, card, value });
        Ok(())
    }

    fn validate_update(&self, _: &Value, _: PlayerIndex) -> Result<(), ControllerError> {
        Err(ControllerError::new("updates are not supported"))
    }

    fn update(&mut self, _: &Value, _: PlayerIndex) -> Result<(), ControllerError> {
        Err(ControllerError::new("updates are not supported"))
    }
}

// ============================================================================
// Veto
// ============================================================================

/// Permissive, except for the move kinds it is told to refuse.
#[derive(Debug, Default)]
pub struct VetoController {
    inner: PermissiveController,
    draws: bool,
    opens: bool,
    updates: bool,
}

impl VetoController {
    /// Refuse every draw.
    pub fn veto_draws(mut self) -> Self {
        self.draws = true;
        self
    }

    /// Refuse every open.
    pub fn veto_opens(mut self) -> Self {
        self.opens = true;
        self
    }

    /// Refuse every update.
    pub fn veto_updates(mut self) -> Self {
        self.updates = true;
        self
    }

    /// Everything reported so far, in order.
    pub fn events(&self) -> &[ControllerEvent] {
        self.inner.events()
    }

    fn check(vetoed: bool, what: &str) -> Result<(), ControllerError> {
        if vetoed {
            Err(ControllerError::new(format!("{what} vetoed")))
        } else {
            Ok(())
        }
    }
}

impl Controller for VetoController {
    fn validate_draw(&self, player: PlayerIndex, card: CardIndex) -> Result<(), ControllerError> {
        Self::check(self.draws, "draw")?;
        self.inner.validate_draw(player, card)
    }

    fn draw(
        &mut self,
        player: PlayerIndex,
        card: CardIndex,
        value: Option<CardValue>,
    ) -> Result<(), ControllerError> {
        self.inner.draw(player, card, value)
    }

    fn validate_open(&self, player: PlayerIndex, card: CardIndex) -> Result<(), ControllerError> {
        Self::check(self.opens, "open")?;
        self.inner.validate_open(player, card)
    }

    fn open(
        &mut self,
        player: PlayerIndex,
        card: CardIndex,
        value: CardValue,
    ) -> Result<(), ControllerError> {
        self.inner.open(player, card, value)
    }

    fn validate_update(&self, info: &Value, player: PlayerIndex) -> Result<(), ControllerError> {
        Self::check(self.updates, "update")?;
        self.inner.validate_update(info, player)
    }

    fn update(&mut self, info: &Value, player: PlayerIndex) -> Result<(), ControllerError> {
        self.inner.update(info, player)
    }
}
