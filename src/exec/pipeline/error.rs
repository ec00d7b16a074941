// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::fmt;

use thiserror::Error;

/// Failure raised by an operator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperatorError {
    /// Cooperative cancellation observed while running inside the driver.
    #[error("interrupted")]
    Interrupted,
    /// Recoverable failure; during teardown these are logged and dropped.
    #[error("{0}")]
    Internal(String),
    /// Non-recoverable failure; always propagated.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl OperatorError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Composite driver failure: one primary error plus errors suppressed while
/// teardown kept going after the first failure.
#[derive(Debug, Clone)]
pub struct DriverError {
    primary: OperatorError,
    suppressed: Vec<OperatorError>,
}

impl DriverError {
    pub fn new(primary: OperatorError) -> Self {
        Self {
            primary,
            suppressed: Vec::new(),
        }
    }

    pub fn primary(&self) -> &OperatorError {
        &self.primary
    }

    pub fn suppressed(&self) -> &[OperatorError] {
        &self.suppressed
    }

    pub fn add_suppressed(&mut self, error: OperatorError) {
        self.suppressed.push(error);
    }

    /// Fold another composite into this one, keeping the receiver primary.
    pub fn absorb(&mut self, other: DriverError) {
        let DriverError {
            primary,
            suppressed,
        } = other;
        self.suppressed.push(primary);
        self.suppressed.extend(suppressed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.primary.is_interrupted()
    }
}

impl From<OperatorError> for DriverError {
    fn from(error: OperatorError) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if !self.suppressed.is_empty() {
            write!(f, " (suppressed:")?;
            for error in &self.suppressed {
                write!(f, " [{}]", error)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.primary)
    }
}
