/*
 * Copyright 2019 Cargill Incorporated
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 * -----------------------------------------------------------------------------
 */

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::execution::{LaunchError, RegistryError};
use crate::handler::{Handler, Registry};

/// The outcome of one chaincode launch, shared by every caller waiting on it.
///
/// Only the first notification is kept.
#[derive(Default)]
pub struct LaunchState {
    result: Mutex<Option<Result<(), LaunchError>>>,
    done: Condvar,
}

impl LaunchState {
    pub fn new() -> Self {
        LaunchState::default()
    }

    /// Records the launch outcome. Returns false if an outcome was already recorded.
    pub fn notify(&self, result: Result<(), LaunchError>) -> bool {
        let mut guard = self.result.lock().expect("Launch state lock was poisoned");
        if guard.is_some() {
            return false;
        }
        *guard = Some(result);
        self.done.notify_all();
        true
    }

    /// Waits up to `timeout` for the outcome; `None` if none was recorded in time.
    pub fn wait(&self, timeout: Duration) -> Option<Result<(), LaunchError>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.result.lock().expect("Launch state lock was poisoned");
        loop {
            if let Some(result) = guard.as_ref() {
                return Some(result.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            guard = self
                .done
                .wait_timeout(guard, deadline - now)
                .expect("Launch state lock was poisoned")
                .0;
        }
    }

    pub fn result(&self) -> Option<Result<(), LaunchError>> {
        self.result
            .lock()
            .expect("Launch state lock was poisoned")
            .clone()
    }
}

#[derive(Default)]
struct RegistryState {
    handlers: HashMap<String, Arc<Handler>>,
    launching: HashMap<String, Arc<LaunchState>>,
}

/// The handlers of the chaincodes currently connected, keyed by `name:version`.
pub struct HandlerRegistry {
    allow_unsolicited: bool,
    state: Mutex<RegistryState>,
}

impl HandlerRegistry {
    /// `allow_unsolicited` accepts registrations from chaincodes the peer did not launch.
    pub fn new(allow_unsolicited: bool) -> Self {
        HandlerRegistry {
            allow_unsolicited,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Returns the launch state for `name`, and whether a launch was already under way.
    ///
    /// A chaincode that is already registered yields a state that has succeeded.
    pub fn launching(&self, name: &str) -> (Arc<LaunchState>, bool) {
        let mut state = self.state.lock().expect("Handler registry lock was poisoned");
        if let Some(launch_state) = state.launching.get(name) {
            return (launch_state.clone(), true);
        }

        let launch_state = Arc::new(LaunchState::new());
        if state.handlers.contains_key(name) {
            launch_state.notify(Ok(()));
            return (launch_state, true);
        }

        state
            .launching
            .insert(name.to_string(), launch_state.clone());
        (launch_state, false)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<Handler>> {
        self.state
            .lock()
            .expect("Handler registry lock was poisoned")
            .handlers
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("Handler registry lock was poisoned")
            .handlers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registry for HandlerRegistry {
    fn register(&self, handler: Arc<Handler>) -> Result<(), RegistryError> {
        let name = handler.chaincode_name().unwrap_or_default();
        let mut state = self.state.lock().expect("Handler registry lock was poisoned");

        if state.handlers.contains_key(&name) {
            return Err(RegistryError::DuplicateRegistration(name));
        }
        if !state.launching.contains_key(&name) && !self.allow_unsolicited {
            return Err(RegistryError::UnsolicitedRegistration(name));
        }

        debug!("Registered handler for {}", name);
        state.handlers.insert(name, handler);
        Ok(())
    }

    fn ready(&self, name: &str) {
        let state = self.state.lock().expect("Handler registry lock was poisoned");
        if let Some(launch_state) = state.launching.get(name) {
            launch_state.notify(Ok(()));
        }
    }

    fn failed(&self, name: &str, err: LaunchError) {
        let state = self.state.lock().expect("Handler registry lock was poisoned");
        if let Some(launch_state) = state.launching.get(name) {
            launch_state.notify(Err(err));
        }
    }

    fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut state = self.state.lock().expect("Handler registry lock was poisoned");
        let launch_state = state.launching.remove(name);
        match state.handlers.remove(name) {
            Some(_) => {
                debug!("Deregistered handler for {}", name);
                Ok(())
            }
            None if launch_state.is_some() => Ok(()),
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    /// Test that the first launch notification wins and waiters see it.
    #[test]
    fn launch_state_first_notification_wins() {
        let launch_state = Arc::new(LaunchState::new());

        let waiter = {
            let launch_state = launch_state.clone();
            thread::spawn(move || launch_state.wait(Duration::from_secs(5)))
        };

        assert!(launch_state.notify(Err(LaunchError::StartFailed("boom".into()))));
        assert!(!launch_state.notify(Ok(())));

        let seen = waiter.join().expect("waiter panicked");
        assert_eq!(
            Some(Err(LaunchError::StartFailed("boom".into()))),
            seen
        );
        assert_eq!(seen, launch_state.result());
    }

    #[test]
    fn launch_state_wait_times_out() {
        let launch_state = LaunchState::new();
        assert_eq!(None, launch_state.wait(Duration::from_millis(20)));
        assert_eq!(None, launch_state.result());
    }

    /// Test that a second launch of the same name joins the first.
    #[test]
    fn launching_is_shared() {
        let registry = HandlerRegistry::new(false);

        let (first, started) = registry.launching("mycc:0");
        assert!(!started);
        let (second, started) = registry.launching("mycc:0");
        assert!(started);
        assert!(Arc::ptr_eq(&first, &second));

        registry.ready("mycc:0");
        assert_eq!(Some(Ok(())), second.result());
    }

    #[test]
    fn failed_notifies_launch() {
        let registry = HandlerRegistry::new(false);
        let (launch_state, _) = registry.launching("mycc:0");

        registry.failed(
            "mycc:0",
            LaunchError::RegistrationFailed("bad handshake".into()),
        );

        assert_eq!(
            Some(Err(LaunchError::RegistrationFailed("bad handshake".into()))),
            launch_state.result()
        );
    }

    #[test]
    fn deregister_clears_launch_and_unknown_is_error() {
        let registry = HandlerRegistry::new(false);
        registry.launching("mycc:0");

        assert_eq!(Ok(()), registry.deregister("mycc:0"));
        assert_eq!(
            Err(RegistryError::NotFound("mycc:0".into())),
            registry.deregister("mycc:0")
        );

        let (_, started) = registry.launching("mycc:0");
        assert!(!started);
    }
}
