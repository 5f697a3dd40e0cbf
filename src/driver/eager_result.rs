// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use thiserror::Error;

use super::record::Record;
use super::summary::Summary;
use crate::value::ValueReceive;

/// A result stream that has been fully loaded into memory.
#[derive(Debug)]
pub struct EagerResult {
    pub keys: Vec<Arc<String>>,
    pub records: Vec<Record>,
    pub summary: Summary,
}

impl EagerResult {
    /// Consume the result, expecting it to contain exactly one record.
    pub fn into_single(mut self) -> Result<Record, GetSingleRecordError> {
        match self.records.len() {
            0 => Err(GetSingleRecordError::NoRecords),
            1 => Ok(self.records.pop().expect("checked length")),
            _ => Err(GetSingleRecordError::TooManyRecords),
        }
    }

    /// Consume the result, expecting it to contain exactly one record with
    /// exactly one value.
    pub fn into_scalar(self) -> Result<ValueReceive, GetSingleRecordError> {
        let record = self.into_single()?;
        let mut values = record.into_values();
        let Some(value) = values.next() else {
            return Err(GetSingleRecordError::NoRecords);
        };
        if values.next().is_some() {
            return Err(GetSingleRecordError::TooManyRecords);
        }
        Ok(value)
    }
}

/// Used when a single record was requested, but the result contained a
/// different number of them.
#[derive(Debug, Error)]
pub enum GetSingleRecordError {
    #[error("no records were found")]
    NoRecords,
    #[error("more than one record was found")]
    TooManyRecords,
}

impl From<GetSingleRecordError> for crate::error_::DriverError {
    fn from(err: GetSingleRecordError) -> Self {
        Self::InvalidArgument {
            message: format!("GetSingleRecordError: {}", err),
        }
    }
}
