//! Atomic batch insert of normalized features.

use indicatif::ProgressBar;

use crate::error::{LoadError, Result, StoreUnavailableError};
use crate::geofile::feature::Feature;
use crate::geofile::geojson::geometry_to_geojson;
use crate::store::{RowId, SpatialStore, StoreError, StoreSession};

/// Lifecycle of a batch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opened,
    Inserting(usize),
    Committed,
    RolledBack,
}

/// Owns the store session for the duration of one batch. Anything other than
/// an explicit `commit` (an error, an early return, a panic) rolls the session
/// back when the guard is dropped.
struct BatchSession<'s> {
    session: Option<Box<dyn StoreSession + 's>>,
    state: SessionState,
}

impl<'s> BatchSession<'s> {
    fn open<S: SpatialStore + ?Sized>(store: &'s mut S) -> Result<Self> {
        let session = store
            .begin()
            .map_err(|source| StoreUnavailableError { source })?;
        log::debug!("Batch session opened");
        Ok(Self {
            session: Some(session),
            state: SessionState::Opened,
        })
    }

    fn insert(&mut self, feature: &Feature) -> std::result::Result<RowId, StoreError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| StoreError::Rejected("batch session already closed".to_string()))?;
        let properties = serde_json::Value::Object(feature.properties.clone());
        let id = session.insert(&geometry_to_geojson(&feature.geometry), &properties)?;
        self.state = match self.state {
            SessionState::Inserting(count) => SessionState::Inserting(count + 1),
            _ => SessionState::Inserting(1),
        };
        Ok(id)
    }

    fn commit(mut self) -> std::result::Result<SessionState, StoreError> {
        match self.session.take() {
            Some(session) => {
                session.commit()?;
                self.state = SessionState::Committed;
                Ok(self.state)
            }
            None => Err(StoreError::Rejected("batch session already closed".to_string())),
        }
    }
}

impl Drop for BatchSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            log::warn!("Rolling back batch session in state {:?}", self.state);
            if let Err(err) = session.rollback() {
                log::error!("Rollback failed: {}", err);
            }
            self.state = SessionState::RolledBack;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub inserted: Vec<RowId>,
    pub state: SessionState,
}

/// Insert all features in one session: either every feature becomes durable or
/// none does. A failing insert aborts the batch with a [`LoadError`] carrying
/// the index of the offending feature.
pub fn load_features<S: SpatialStore + ?Sized>(
    store: &mut S,
    features: &[Feature],
    show_progress: bool,
) -> Result<LoadReport> {
    let mut batch = BatchSession::open(store)?;

    log::info!("Inserting {} features", features.len());
    let bar = if show_progress {
        ProgressBar::new(features.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    let mut inserted = Vec::with_capacity(features.len());
    for (index, feature) in features.iter().enumerate() {
        let id = batch.insert(feature).map_err(|source| {
            log::error!("Inserting feature {} failed: {}", index, source);
            LoadError {
                index: Some(index),
                source,
            }
        })?;
        inserted.push(id);
        bar.inc(1);
    }
    bar.finish_and_clear();

    let state = batch
        .commit()
        .map_err(|source| LoadError {
            index: None,
            source,
        })?;
    log::info!("Committed {} features", inserted.len());
    Ok(LoadReport { inserted, state })
}
