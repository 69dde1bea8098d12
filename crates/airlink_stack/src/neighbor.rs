//! Stations heard recently, and what their beacons announced.

use {
    crate::layer::LayerError,
    ahash::AHashMap,
    airlink_proto::{
        MacId,
        header::BeaconHeader,
        position::{CprPosition, HopCount, PositionQuality},
    },
    log::debug,
};

/// What is known about a neighboring station.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Last position the neighbor announced.
    pub position: CprPosition,
    /// Quality of [`Neighbor::position`].
    pub position_quality: PositionQuality,
    /// Hops from the neighbor to its nearest ground station.
    pub hops_to_gs: HopCount,
    /// Slot in which anything was last heard from the neighbor.
    pub last_seen_slot: u64,
}

/// Neighboring stations keyed by [`MacId`].
///
/// Entries are created from beacons. Other traffic only refreshes
/// [`Neighbor::last_seen_slot`] of stations already known.
///
/// # Examples
///
/// ```
/// use airlink_stack::{
///     layer::LayerError,
///     neighbor::NeighborTable,
///     proto::{MacId, header::BeaconHeader},
/// };
///
/// let mut table = NeighborTable::new();
/// table.update_from_beacon(MacId::new(4), &BeaconHeader::default(), 10);
/// assert_eq!(10, table.get(MacId::new(4)).unwrap().last_seen_slot);
///
/// assert_eq!(
///     Err(LayerError::UnknownId { id: MacId::new(5) }),
///     table.get(MacId::new(5)).map(|_| ())
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    neighbors: AHashMap<MacId, Neighbor>,
}

impl NeighborTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records what the beacon of `id` announced, heard in `slot`.
    ///
    /// Returns `true` if `id` was not known before.
    pub fn update_from_beacon(&mut self, id: MacId, beacon: &BeaconHeader, slot: u64) -> bool {
        let neighbor = Neighbor {
            position: beacon.position,
            position_quality: beacon.position_quality,
            hops_to_gs: beacon.hops_to_gs,
            last_seen_slot: slot,
        };
        let is_new = self.neighbors.insert(id, neighbor).is_none();
        if is_new {
            debug!("New neighbor {id}, {} hops from a ground station", beacon.hops_to_gs.get());
        }
        is_new
    }

    /// Refreshes when `id` was last heard from, if it is known.
    ///
    /// Returns `false` if `id` is not known.
    pub fn mark_seen(&mut self, id: MacId, slot: u64) -> bool {
        let Some(neighbor) = self.neighbors.get_mut(&id) else {
            return false;
        };
        neighbor.last_seen_slot = neighbor.last_seen_slot.max(slot);
        true
    }

    /// Gets what is known about `id`.
    ///
    /// # Errors
    ///
    /// Errors if `id` is not known.
    pub fn get(&self, id: MacId) -> Result<&Neighbor, LayerError> {
        self.neighbors.get(&id).ok_or(LayerError::UnknownId { id })
    }

    /// Gets the last position announced by `id`.
    ///
    /// # Errors
    ///
    /// Errors if `id` is not known.
    pub fn position(&self, id: MacId) -> Result<CprPosition, LayerError> {
        self.get(id).map(|neighbor| neighbor.position)
    }

    /// Gets the last hop count announced by `id`.
    ///
    /// # Errors
    ///
    /// Errors if `id` is not known.
    pub fn hops_to_gs(&self, id: MacId) -> Result<HopCount, LayerError> {
        self.get(id).map(|neighbor| neighbor.hops_to_gs)
    }

    /// Forgets every neighbor not heard from since `slot`, and returns their
    /// identifiers.
    pub fn remove_unseen_since(&mut self, slot: u64) -> Vec<MacId> {
        let mut removed = Vec::new();
        self.neighbors.retain(|id, neighbor| {
            let keep = neighbor.last_seen_slot >= slot;
            if !keep {
                removed.push(*id);
            }
            keep
        });
        for id in &removed {
            debug!("Lost neighbor {id}");
        }
        removed
    }

    /// Number of known neighbors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Gets if no neighbor is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Iterates over all known neighbors, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (MacId, &Neighbor)> {
        self.neighbors.iter().map(|(id, neighbor)| (*id, neighbor))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    const A: MacId = MacId::new(1);
    const B: MacId = MacId::new(2);

    fn beacon(hops: u32) -> BeaconHeader {
        BeaconHeader {
            position: CprPosition::new(53.5, 10.0, 35_000.0),
            hops_to_gs: HopCount::saturating(hops),
            position_quality: PositionQuality::High,
            ..Default::default()
        }
    }

    #[test]
    fn beacons_create_and_update() {
        let mut table = NeighborTable::new();
        assert!(table.is_empty());
        assert!(table.update_from_beacon(A, &beacon(3), 1));
        assert!(!table.update_from_beacon(A, &beacon(2), 5));

        let neighbor = table.get(A).unwrap();
        assert_eq!(2, neighbor.hops_to_gs.get());
        assert_eq!(5, neighbor.last_seen_slot);
        assert_eq!(PositionQuality::High, neighbor.position_quality);
        assert_eq!(Ok(CprPosition::new(53.5, 10.0, 35_000.0)), table.position(A));
        assert_eq!(1, table.len());
    }

    #[test]
    fn unknown_ids() {
        let mut table = NeighborTable::new();
        assert!(!table.mark_seen(A, 1));
        assert_matches!(table.get(A), Err(LayerError::UnknownId { id }) if id == A);
        assert_matches!(table.position(A), Err(LayerError::UnknownId { .. }));
        assert_matches!(table.hops_to_gs(A), Err(LayerError::UnknownId { .. }));
    }

    #[test]
    fn mark_seen_never_goes_back() {
        let mut table = NeighborTable::new();
        table.update_from_beacon(A, &beacon(1), 10);
        assert!(table.mark_seen(A, 12));
        assert!(table.mark_seen(A, 11));
        assert_eq!(12, table.get(A).unwrap().last_seen_slot);
    }

    #[test]
    fn remove_unseen() {
        let mut table = NeighborTable::new();
        table.update_from_beacon(A, &beacon(1), 3);
        table.update_from_beacon(B, &beacon(1), 8);
        assert_eq!(vec![A], table.remove_unseen_since(5));
        assert_eq!(vec![B], table.iter().map(|(id, _)| id).collect::<Vec<_>>());
        assert_eq!(vec![B], table.remove_unseen_since(9));
        assert!(table.is_empty());
    }
}
