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

//! Configuration of the chaincode support engine.

use std::error::Error as StdError;
use std::time::Duration;

const DEFAULT_PEER_ADDRESS: &str = "0.0.0.0:7052";
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_SHIM_LOG_LEVEL: &str = "warning";
const DEFAULT_LOG_FORMAT: &str =
    "%{color}%{time:2006-01-02 15:04:05.000 MST} [%{module}] %{shortfunc} -> %{level:.4s} %{id:03x}%{color:reset} %{message}";
const DEFAULT_MAX_RESULT_LIMIT: usize = 100;

const LOG_LEVELS: [&str; 6] = ["critical", "error", "warning", "notice", "info", "debug"];

#[derive(Debug, Clone, PartialEq)]
pub struct ChaincodeSupportConfig {
    peer_address: String,
    startup_timeout: Duration,
    execute_timeout: Duration,
    install_timeout: Duration,
    log_level: String,
    shim_log_level: String,
    log_format: String,
    user_runs_cc: bool,
    max_result_limit: usize,
}

impl ChaincodeSupportConfig {
    /// The address chaincodes dial to reach the peer.
    pub fn peer_address(&self) -> &str {
        &self.peer_address
    }

    /// How long a launch may take before the chaincode is registered and ready.
    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// How long an invoker waits for a chaincode to complete a transaction.
    pub fn execute_timeout(&self) -> Duration {
        self.execute_timeout
    }

    /// Lower bound of the execute timeout for lifecycle system chaincode calls.
    pub fn install_timeout(&self) -> Duration {
        self.install_timeout
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn shim_log_level(&self) -> &str {
        &self.shim_log_level
    }

    pub fn log_format(&self) -> &str {
        &self.log_format
    }

    /// Development mode: chaincodes started outside the peer may register themselves.
    pub fn user_runs_cc(&self) -> bool {
        self.user_runs_cc
    }

    /// Maximum number of results in one page of a query response.
    pub fn max_result_limit(&self) -> usize {
        self.max_result_limit
    }
}

impl Default for ChaincodeSupportConfig {
    fn default() -> Self {
        ChaincodeSupportConfig {
            peer_address: DEFAULT_PEER_ADDRESS.into(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            execute_timeout: DEFAULT_EXECUTE_TIMEOUT,
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            log_level: DEFAULT_LOG_LEVEL.into(),
            shim_log_level: DEFAULT_SHIM_LOG_LEVEL.into(),
            log_format: DEFAULT_LOG_FORMAT.into(),
            user_runs_cc: false,
            max_result_limit: DEFAULT_MAX_RESULT_LIMIT,
        }
    }
}

#[derive(Debug)]
pub enum ConfigBuilderError {
    InvalidField(String),
}

impl StdError for ConfigBuilderError {}

impl std::fmt::Display for ConfigBuilderError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ConfigBuilderError::InvalidField(ref s) => write!(f, "InvalidField: {}", s),
        }
    }
}

/// Builds a `ChaincodeSupportConfig`; unset fields take their defaults.
#[derive(Default, Clone)]
pub struct ChaincodeSupportConfigBuilder {
    peer_address: Option<String>,
    startup_timeout: Option<Duration>,
    execute_timeout: Option<Duration>,
    install_timeout: Option<Duration>,
    log_level: Option<String>,
    shim_log_level: Option<String>,
    log_format: Option<String>,
    user_runs_cc: Option<bool>,
    max_result_limit: Option<usize>,
}

impl ChaincodeSupportConfigBuilder {
    pub fn new() -> Self {
        ChaincodeSupportConfigBuilder::default()
    }

    pub fn with_peer_address(mut self, peer_address: String) -> Self {
        self.peer_address = Some(peer_address);
        self
    }

    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = Some(startup_timeout);
        self
    }

    pub fn with_execute_timeout(mut self, execute_timeout: Duration) -> Self {
        self.execute_timeout = Some(execute_timeout);
        self
    }

    pub fn with_install_timeout(mut self, install_timeout: Duration) -> Self {
        self.install_timeout = Some(install_timeout);
        self
    }

    pub fn with_log_level(mut self, log_level: String) -> Self {
        self.log_level = Some(log_level);
        self
    }

    pub fn with_shim_log_level(mut self, shim_log_level: String) -> Self {
        self.shim_log_level = Some(shim_log_level);
        self
    }

    pub fn with_log_format(mut self, log_format: String) -> Self {
        self.log_format = Some(log_format);
        self
    }

    pub fn with_user_runs_cc(mut self, user_runs_cc: bool) -> Self {
        self.user_runs_cc = Some(user_runs_cc);
        self
    }

    pub fn with_max_result_limit(mut self, max_result_limit: usize) -> Self {
        self.max_result_limit = Some(max_result_limit);
        self
    }

    pub fn build(self) -> Result<ChaincodeSupportConfig, ConfigBuilderError> {
        let defaults = ChaincodeSupportConfig::default();

        let peer_address = self.peer_address.unwrap_or(defaults.peer_address);
        if peer_address.is_empty() {
            return Err(ConfigBuilderError::InvalidField(
                "'peer_address' must not be empty".into(),
            ));
        }

        let startup_timeout = non_zero(
            "startup_timeout",
            self.startup_timeout.unwrap_or(defaults.startup_timeout),
        )?;
        let execute_timeout = non_zero(
            "execute_timeout",
            self.execute_timeout.unwrap_or(defaults.execute_timeout),
        )?;
        let install_timeout = non_zero(
            "install_timeout",
            self.install_timeout.unwrap_or(defaults.install_timeout),
        )?;

        let max_result_limit = self.max_result_limit.unwrap_or(defaults.max_result_limit);
        if max_result_limit == 0 {
            return Err(ConfigBuilderError::InvalidField(
                "'max_result_limit' must be greater than zero".into(),
            ));
        }

        Ok(ChaincodeSupportConfig {
            peer_address,
            startup_timeout,
            execute_timeout,
            install_timeout,
            log_level: log_level("log_level", self.log_level.unwrap_or(defaults.log_level))?,
            shim_log_level: log_level(
                "shim_log_level",
                self.shim_log_level.unwrap_or(defaults.shim_log_level),
            )?,
            log_format: self.log_format.unwrap_or(defaults.log_format),
            user_runs_cc: self.user_runs_cc.unwrap_or(defaults.user_runs_cc),
            max_result_limit,
        })
    }
}

fn non_zero(field: &str, timeout: Duration) -> Result<Duration, ConfigBuilderError> {
    if timeout == Duration::from_secs(0) {
        Err(ConfigBuilderError::InvalidField(format!(
            "'{}' must be greater than zero",
            field
        )))
    } else {
        Ok(timeout)
    }
}

fn log_level(field: &str, level: String) -> Result<String, ConfigBuilderError> {
    let level = level.to_lowercase();
    if LOG_LEVELS.contains(&level.as_str()) {
        Ok(level)
    } else {
        Err(ConfigBuilderError::InvalidField(format!(
            "'{}' has unknown level {}",
            field, level
        )))
    }
}
