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

use crate::value::ValueReceive;

/// One row of a query result.
///
/// All records of a stream share one key list (in the order the server
/// announced when the query started); values sit in a parallel vector.
/// Taken values leave a hole so the remaining entries keep their positions.
#[derive(Debug)]
pub struct Record {
    keys: Arc<Vec<Arc<String>>>,
    values: Vec<Option<ValueReceive>>,
}

impl Record {
    pub(crate) fn new(keys: Arc<Vec<Arc<String>>>, values: Vec<ValueReceive>) -> Self {
        assert_eq!(keys.len(), values.len());
        Self {
            keys,
            values: values.into_iter().map(Some).collect(),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|known| known.as_str() == key)
    }

    /// Iterate over the keys of the record.
    /// The order of the keys corresponds to the order of the values.
    pub fn keys(&self) -> impl Iterator<Item = Arc<String>> + '_ {
        self.keys
            .iter()
            .zip(&self.values)
            .filter(|(_, value)| value.is_some())
            .map(|(key, _)| Arc::clone(key))
    }

    /// Iterate over the values of the record.
    /// The order of the values corresponds to the order of the keys.
    pub fn values(&self) -> impl Iterator<Item = &ValueReceive> {
        self.values.iter().filter_map(Option::as_ref)
    }

    /// Iterate over the values of the record.
    ///
    /// This is the same as [`Record::values()`], but consumes the record and
    /// returns owned values.
    pub fn into_values(self) -> impl Iterator<Item = ValueReceive> {
        self.values.into_iter().flatten()
    }

    /// Iterate over the key-value pairs of the record.
    pub fn entries(&self) -> impl Iterator<Item = (Arc<String>, &ValueReceive)> {
        self.keys
            .iter()
            .zip(&self.values)
            .filter_map(|(key, value)| value.as_ref().map(|value| (Arc::clone(key), value)))
    }

    /// Iterate over the key-value pairs of the record.
    ///
    /// This is the same as [`Record::entries()`], but consumes the record and
    /// returns owned values.
    pub fn into_entries(self) -> impl Iterator<Item = (Arc<String>, ValueReceive)> {
        self.keys
            .iter()
            .map(Arc::clone)
            .collect::<Vec<_>>()
            .into_iter()
            .zip(self.values)
            .filter_map(|(key, value)| value.map(|value| (key, value)))
    }

    /// Get the value for the given key or [`None`] if the key does not exist.
    pub fn value(&self, key: &str) -> Option<&ValueReceive> {
        self.values[self.position(key)?].as_ref()
    }

    /// Remove and return the value for the given key or [`None`] if the key
    /// does not exist.
    pub fn take_value(&mut self, key: &str) -> Option<ValueReceive> {
        let position = self.position(key)?;
        self.values[position].take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entries: &[(&str, i64)]) -> Record {
        let keys = entries
            .iter()
            .map(|(key, _)| Arc::new(String::from(*key)))
            .collect::<Vec<_>>();
        let values = entries
            .iter()
            .map(|(_, value)| ValueReceive::Integer(*value))
            .collect();
        Record::new(Arc::new(keys), values)
    }

    #[test]
    fn value_lookup() {
        let record = record(&[("one", 1), ("two", 2)]);
        assert_eq!(record.value("two"), Some(&ValueReceive::Integer(2)));
        assert_eq!(record.value("three"), None);
    }

    #[test]
    fn take_value_removes_entry() {
        let mut record = record(&[("one", 1), ("two", 2)]);
        assert_eq!(record.take_value("one"), Some(ValueReceive::Integer(1)));
        assert_eq!(record.take_value("one"), None);
        assert_eq!(
            record.keys().collect::<Vec<_>>(),
            vec![Arc::new(String::from("two"))]
        );
    }

    #[test]
    fn field_order_is_preserved() {
        let record = record(&[("c", 3), ("a", 1), ("b", 2)]);
        assert_eq!(
            record.into_values().collect::<Vec<_>>(),
            vec![
                ValueReceive::Integer(3),
                ValueReceive::Integer(1),
                ValueReceive::Integer(2),
            ]
        );
    }
}
