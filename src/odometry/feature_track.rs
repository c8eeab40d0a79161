//! Feature tracks: repeated observations of one map line or plane across scans.
//!
//! A track links each observation `(point_index, scan_index)` to the optimizer state
//! it is expressed against. After a solve the orchestration layer fills a
//! [`JacobianStore`] with per-point Jacobians; tracks only hold a [`Weak`] handle to it.

use crate::error::{OdometryError, OdometryResult};
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, Vector3, Vector6};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::{debug, trace};

/// One observation of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mapping {
    /// Column of the point in its scan
    pub point_index: usize,
    pub scan_index: u32,
    /// Knot the observation's time interval starts at
    pub state_id: u32,
}

/// Contiguous range of scan indices `[first, first + len)` in the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    first: u32,
    len: u32,
}

impl ScanWindow {
    pub fn new(first: u32, len: u32) -> Self {
        Self { first, len }
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Newest scan in the window.
    pub fn last(&self) -> Option<u32> {
        self.range().next_back()
    }

    pub fn contains(&self, scan_index: u32) -> bool {
        self.range().contains(&scan_index)
    }

    /// Advance the window by `n` scans, keeping its length.
    pub fn slide(&mut self, n: u32) {
        self.first = self.first.saturating_add(n);
    }

    pub fn iter(&self) -> Range<u32> {
        self.range()
    }

    fn range(&self) -> Range<u32> {
        self.first..self.first.saturating_add(self.len)
    }
}

/// Rank-3 tensor of shape 3 × state_dim × point_count, stored as a
/// 3 × (state_dim · point_count) matrix with one 3 × state_dim block per point.
#[derive(Debug, Clone, PartialEq)]
pub struct StateJacobianTensor {
    state_dim: usize,
    data: DMatrix<f64>,
}

impl StateJacobianTensor {
    pub fn zeros(state_dim: usize, point_count: usize) -> Self {
        Self {
            state_dim,
            data: DMatrix::zeros(3, state_dim * point_count),
        }
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn point_count(&self) -> usize {
        if self.state_dim == 0 {
            0
        } else {
            self.data.ncols() / self.state_dim
        }
    }

    pub fn point_block(&self, point_index: usize) -> Option<DMatrixView<'_, f64>> {
        (point_index < self.point_count())
            .then(|| self.data.view((0, point_index * self.state_dim), (3, self.state_dim)))
    }

    pub fn point_block_mut(&mut self, point_index: usize) -> Option<DMatrixViewMut<'_, f64>> {
        if point_index >= self.point_count() {
            return None;
        }
        let state_dim = self.state_dim;
        Some(
            self.data
                .view_mut((0, point_index * state_dim), (3, state_dim)),
        )
    }
}

/// Per-scan tensors for the consecutive states `first_state, first_state + 1, …`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanJacobians {
    pub first_state: u32,
    pub tensors: Vec<StateJacobianTensor>,
}

/// Point Jacobians indexed by scan, then by state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JacobianStore {
    scans: BTreeMap<u32, ScanJacobians>,
}

impl JacobianStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle the orchestration layer owns; tracks bind to it.
    pub fn shared() -> Arc<RwLock<JacobianStore>> {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn insert_scan(&mut self, scan_index: u32, jacobians: ScanJacobians) {
        self.scans.insert(scan_index, jacobians);
    }

    pub fn scan(&self, scan_index: u32) -> Option<&ScanJacobians> {
        self.scans.get(&scan_index)
    }

    pub fn tensor(&self, scan_index: u32, state_id: u32) -> Option<&StateJacobianTensor> {
        let scan = self.scans.get(&scan_index)?;
        let offset = state_id.checked_sub(scan.first_state)?;
        scan.tensors.get(offset as usize)
    }

    /// Drop every scan outside `window`.
    pub fn retain_window(&mut self, window: &ScanWindow) {
        self.scans.retain(|scan_index, _| window.contains(*scan_index));
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn clear(&mut self) {
        self.scans.clear();
    }
}

/// Observations of one line or plane feature.
#[derive(Debug, Clone)]
pub struct FeatureTrack {
    /// Line: point and direction. Plane: point and normal.
    geometry: Vector6<f64>,
    mapping: Vec<Mapping>,
    length: usize,
    optimize: bool,
    jacobians: Option<Weak<RwLock<JacobianStore>>>,
}

impl FeatureTrack {
    pub fn new(geometry: Vector6<f64>) -> Self {
        Self {
            geometry,
            mapping: Vec::new(),
            length: 0,
            optimize: true,
            jacobians: None,
        }
    }

    pub fn geometry(&self) -> &Vector6<f64> {
        &self.geometry
    }

    /// Replace the geometry after an external re-estimation.
    pub fn set_geometry(&mut self, geometry: Vector6<f64>) {
        self.geometry = geometry;
    }

    /// Geometry read as `(point, direction)`.
    pub fn line(&self) -> (Vector3<f64>, Vector3<f64>) {
        (
            self.geometry.fixed_rows::<3>(0).into_owned(),
            self.geometry.fixed_rows::<3>(3).into_owned(),
        )
    }

    pub fn mapping(&self) -> &[Mapping] {
        &self.mapping
    }

    /// Number of distinct scans the feature was observed in.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_active(&self) -> bool {
        self.optimize
    }

    pub fn first_scan(&self) -> Option<u32> {
        self.mapping.first().map(|m| m.scan_index)
    }

    pub fn last_scan(&self) -> Option<u32> {
        self.mapping.last().map(|m| m.scan_index)
    }

    /// Scans between the first observation and the newest scan of `window`.
    pub fn age(&self, window: &ScanWindow) -> Option<u32> {
        window.last()?.checked_sub(self.first_scan()?)
    }

    /// Record a new observation.
    ///
    /// # Errors
    /// `InvalidArgument` if the scan is outside `window` or the point was already
    /// recorded for that scan. The mapping is unchanged on error.
    pub fn append_observation(
        &mut self,
        point_index: usize,
        scan_index: u32,
        state_id: u32,
        window: &ScanWindow,
    ) -> OdometryResult<()> {
        if !window.contains(scan_index) {
            return Err(OdometryError::InvalidArgument(format!(
                "scan {scan_index} is outside the active window {:?}",
                window.iter()
            )));
        }
        if self
            .mapping
            .iter()
            .any(|m| m.point_index == point_index && m.scan_index == scan_index)
        {
            return Err(OdometryError::InvalidArgument(format!(
                "point {point_index} of scan {scan_index} is already in the track"
            )));
        }

        let new_scan = self.mapping.iter().all(|m| m.scan_index != scan_index);
        self.mapping.push(Mapping {
            point_index,
            scan_index,
            state_id,
        });
        if new_scan {
            self.length += 1;
        }
        trace!(point_index, scan_index, state_id, length = self.length, "observation appended");
        Ok(())
    }

    /// Exclude the track from optimization. Idempotent.
    pub fn mark_invalid(&mut self) {
        if self.optimize {
            debug!(observations = self.mapping.len(), "feature track invalidated");
        }
        self.optimize = false;
    }

    /// Re-admit an invalidated track.
    pub fn enable(&mut self) {
        self.optimize = true;
    }

    /// Install the non-owning handle to the Jacobian store. Allowed once.
    pub fn bind_jacobian_source(&mut self, store: &Arc<RwLock<JacobianStore>>) -> OdometryResult<()> {
        if self.jacobians.is_some() {
            return Err(OdometryError::InvalidArgument(
                "Jacobian source is already bound".to_string(),
            ));
        }
        self.jacobians = Some(Arc::downgrade(store));
        Ok(())
    }

    /// True once a Jacobian source is bound and while its store is still alive.
    pub fn is_jacobian_source_bound(&self) -> bool {
        self.jacobians
            .as_ref()
            .is_some_and(|store| store.strong_count() > 0)
    }

    /// 3 × state_dim Jacobian of observation `observation` from the bound store.
    ///
    /// # Errors
    /// `NotBound` if nothing was bound or the store was dropped; `InvalidArgument` if the
    /// observation or its store entry does not exist.
    pub fn observation_jacobian(&self, observation: usize) -> OdometryResult<DMatrix<f64>> {
        let store = self
            .jacobians
            .as_ref()
            .ok_or_else(|| OdometryError::NotBound("no Jacobian source bound".to_string()))?
            .upgrade()
            .ok_or_else(|| OdometryError::NotBound("Jacobian source was dropped".to_string()))?;
        let mapping = self.mapping.get(observation).ok_or_else(|| {
            OdometryError::InvalidArgument(format!(
                "observation {observation} out of range ({} recorded)",
                self.mapping.len()
            ))
        })?;

        let guard = store.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .tensor(mapping.scan_index, mapping.state_id)
            .and_then(|tensor| tensor.point_block(mapping.point_index))
            .map(|block| block.clone_owned())
            .ok_or_else(|| {
                OdometryError::InvalidArgument(format!(
                    "no Jacobian for point {} of scan {} at state {}",
                    mapping.point_index, mapping.scan_index, mapping.state_id
                ))
            })
    }

    /// Drop observations whose scan left `window`; returns how many were removed.
    pub fn retain_window(&mut self, window: &ScanWindow) -> usize {
        let before = self.mapping.len();
        self.mapping.retain(|m| window.contains(m.scan_index));
        let removed = before - self.mapping.len();
        if removed > 0 {
            self.length = self
                .mapping
                .iter()
                .map(|m| m.scan_index)
                .collect::<BTreeSet<_>>()
                .len();
            debug!(removed, length = self.length, "feature track retired old observations");
        }
        removed
    }
}
