//! Online/offline signal consulted before every remote call.
//!
//! All branching between "try the server" and "serve the local store" goes
//! through [`Connectivity::is_online`]. An unknown state reads as offline so
//! a missing signal never leads to a request that hangs.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Source of truth for whether the server is worth trying.
pub trait Connectivity: Send + Sync {
  /// Must not block, and must not panic.
  fn is_online(&self) -> bool;
}

impl<F> Connectivity for F
where
  F: Fn() -> bool + Send + Sync,
{
  fn is_online(&self) -> bool {
    self()
  }
}

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
  Online = 0,
  Offline = 1,
  /// No signal yet
  Unknown = 2,
}

impl fmt::Display for ConnectivityState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConnectivityState::Online => write!(f, "online"),
      ConnectivityState::Offline => write!(f, "offline"),
      ConnectivityState::Unknown => write!(f, "unknown"),
    }
  }
}

/// Atomic wrapper for ConnectivityState.
struct AtomicConnectivityState(AtomicU8);

impl AtomicConnectivityState {
  fn new(state: ConnectivityState) -> Self {
    Self(AtomicU8::new(state as u8))
  }

  fn load(&self) -> ConnectivityState {
    match self.0.load(Ordering::SeqCst) {
      0 => ConnectivityState::Online,
      1 => ConnectivityState::Offline,
      _ => ConnectivityState::Unknown,
    }
  }

  fn swap(&self, state: ConnectivityState) -> ConnectivityState {
    match self.0.swap(state as u8, Ordering::SeqCst) {
      0 => ConnectivityState::Online,
      1 => ConnectivityState::Offline,
      _ => ConnectivityState::Unknown,
    }
  }
}

/// Connectivity oracle fed by the platform's network signal, with an
/// optional one-shot probe against the API's health endpoint.
///
/// There is no background polling; the state only changes through
/// [`NetworkMonitor::set_state`] or an explicit [`NetworkMonitor::probe`].
pub struct NetworkMonitor {
  state: AtomicConnectivityState,
  client: reqwest::Client,
  probe_url: Option<Url>,
}

impl NetworkMonitor {
  /// Create a monitor in the unknown state.
  pub fn new(probe_url: Option<Url>, probe_timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(probe_timeout)
      .build()
      .map_err(|e| eyre!("Failed to create probe client: {}", e))?;

    Ok(Self {
      state: AtomicConnectivityState::new(ConnectivityState::Unknown),
      client,
      probe_url,
    })
  }

  pub fn state(&self) -> ConnectivityState {
    self.state.load()
  }

  /// Pass a platform connectivity change through.
  pub fn set_state(&self, state: ConnectivityState) {
    let previous = self.state.swap(state);
    if previous != state {
      match state {
        ConnectivityState::Online => info!("Connection restored"),
        ConnectivityState::Offline => warn!("Connection lost, serving cached data"),
        ConnectivityState::Unknown => debug!("Connectivity unknown"),
      }
    }
  }

  /// Probe the health endpoint once and record the outcome.
  ///
  /// Any HTTP response counts as online: the network path to the server
  /// works, and request-level failures fall back to the cache on their own.
  pub async fn probe(&self) -> ConnectivityState {
    let Some(url) = &self.probe_url else {
      return self.state();
    };

    let state = match self.client.get(url.clone()).send().await {
      Ok(response) => {
        debug!(status = %response.status(), "Connectivity probe answered");
        ConnectivityState::Online
      }
      Err(e) => {
        debug!("Connectivity probe failed: {}", e);
        ConnectivityState::Offline
      }
    };

    self.set_state(state);
    state
  }
}

impl Connectivity for NetworkMonitor {
  fn is_online(&self) -> bool {
    self.state() == ConnectivityState::Online
  }
}
