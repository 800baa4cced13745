//! Lobby slots and their setup state machine.
//!
//! Each slot moves through `Empty -> SettingUp -> Joinable -> Full -> InProgress`
//! and back to `Empty`. Every method returns the slot's new state when the
//! event caused a transition, and `None` when the event does not apply to the
//! slot's current state, in which case the slot is left untouched.

use arena_shared::{ClientId, SlotId, SlotState, SlotSummary, MIN_PLAYERS};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LobbySlot {
    pub state: SlotState,
    pub map_name: Option<String>,
    pub host: Option<ClientId>,
    /// Members in join order; the host comes first.
    pub player_ids: Vec<ClientId>,
    pub capacity: usize,
}

impl LobbySlot {
    pub fn contains(&self, client_id: ClientId) -> bool {
        self.player_ids.contains(&client_id)
    }

    pub fn num_players(&self) -> usize {
        self.player_ids.len()
    }

    fn is_at_capacity(&self) -> bool {
        self.player_ids.len() >= self.capacity
    }

    fn reset(&mut self) {
        *self = LobbySlot::default();
    }
}

#[derive(Debug, Clone)]
pub struct Lobby {
    slots: Vec<LobbySlot>,
}

impl Lobby {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![LobbySlot::default(); slot_count],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, slot_id: SlotId) -> Option<&LobbySlot> {
        self.slots.get(slot_id)
    }

    pub fn state(&self, slot_id: SlotId) -> Option<SlotState> {
        self.slots.get(slot_id).map(|slot| slot.state)
    }

    pub fn summaries(&self) -> Vec<SlotSummary> {
        self.slots
            .iter()
            .enumerate()
            .map(|(slot_id, slot)| SlotSummary {
                slot_id,
                state: slot.state,
                num_players: slot.num_players(),
                map_name: slot.map_name.clone(),
            })
            .collect()
    }

    fn slot_in(&mut self, slot_id: SlotId, states: &[SlotState]) -> Option<&mut LobbySlot> {
        self.slots
            .get_mut(slot_id)
            .filter(|slot| states.contains(&slot.state))
    }

    pub fn host_game(&mut self, slot_id: SlotId, client_id: ClientId) -> Option<SlotState> {
        let slot = self.slot_in(slot_id, &[SlotState::Empty])?;
        slot.state = SlotState::SettingUp;
        slot.host = Some(client_id);
        slot.player_ids = vec![client_id];
        Some(slot.state)
    }

    /// Records the host's stage choice. The slot stays in `SettingUp`.
    pub fn select_stage(
        &mut self,
        slot_id: SlotId,
        client_id: ClientId,
        map_name: &str,
        capacity: usize,
    ) -> Option<SlotState> {
        let slot = self.slot_in(slot_id, &[SlotState::SettingUp])?;
        if slot.host != Some(client_id) {
            return None;
        }
        slot.map_name = Some(map_name.to_string());
        slot.capacity = capacity;
        Some(slot.state)
    }

    pub fn enter_pending_game(&mut self, slot_id: SlotId, client_id: ClientId) -> Option<SlotState> {
        let slot = self.slot_in(slot_id, &[SlotState::SettingUp, SlotState::Joinable])?;
        if slot.map_name.is_none() || slot.contains(client_id) || slot.is_at_capacity() {
            return None;
        }

        slot.player_ids.push(client_id);
        if slot.num_players() >= MIN_PLAYERS {
            slot.state = if slot.is_at_capacity() {
                SlotState::Full
            } else {
                SlotState::Joinable
            };
        }
        Some(slot.state)
    }

    /// Removes a member from a pending game and re-evaluates the slot.
    ///
    /// A departing host hands the slot to the longest-waiting member. A slot
    /// nobody is left in goes back to `Empty`.
    pub fn leave_pending_game(&mut self, slot_id: SlotId, client_id: ClientId) -> Option<SlotState> {
        let slot = self.slot_in(slot_id, &[SlotState::Joinable, SlotState::Full])?;
        if !slot.contains(client_id) {
            return None;
        }

        slot.player_ids.retain(|&id| id != client_id);
        if slot.host == Some(client_id) {
            slot.host = slot.player_ids.first().copied();
        }
        if slot.player_ids.is_empty() {
            slot.reset();
        } else if slot.num_players() < MIN_PLAYERS {
            slot.state = SlotState::SettingUp;
        } else {
            slot.state = SlotState::Joinable;
        }
        Some(slot.state)
    }

    /// Abandons a slot still being set up. Returns the members that were in it.
    pub fn abandon_setup(&mut self, slot_id: SlotId) -> Option<Vec<ClientId>> {
        let slot = self.slot_in(slot_id, &[SlotState::SettingUp])?;
        let members = std::mem::take(&mut slot.player_ids);
        slot.reset();
        Some(members)
    }

    /// Members and stage of a slot that `client_id` may start, without changing it.
    pub fn startable(&self, slot_id: SlotId, client_id: ClientId) -> Option<(&[ClientId], Option<&str>)> {
        self.slots
            .get(slot_id)
            .filter(|slot| matches!(slot.state, SlotState::Joinable | SlotState::Full))
            .filter(|slot| slot.contains(client_id))
            .map(|slot| (slot.player_ids.as_slice(), slot.map_name.as_deref()))
    }

    pub fn mark_in_progress(&mut self, slot_id: SlotId) -> Option<SlotState> {
        let slot = self.slot_in(slot_id, &[SlotState::Joinable, SlotState::Full])?;
        slot.state = SlotState::InProgress;
        Some(slot.state)
    }

    /// Drops a player from a running match. Returns how many remain.
    pub fn leave_match(&mut self, slot_id: SlotId, client_id: ClientId) -> Option<usize> {
        let slot = self.slot_in(slot_id, &[SlotState::InProgress])?;
        slot.player_ids.retain(|&id| id != client_id);
        Some(slot.num_players())
    }

    /// Replaces a finished match's slot with a fresh empty one.
    pub fn release(&mut self, slot_id: SlotId) -> Option<SlotState> {
        let slot = self.slot_in(slot_id, &[SlotState::InProgress])?;
        slot.reset();
        Some(slot.state)
    }
}
