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

#[cfg(doc)]
use crate::ValueSend;

macro_rules! hash_map {
    () => {
        std::collections::HashMap::new()
    };
    ( $($key:expr => $value:expr),+ $(,)? ) => {
        std::collections::HashMap::from_iter([$(($key, $value)),+])
    };
}

pub(crate) use hash_map;

/// Short notation for creating a [`ValueSend`].
///
/// # Examples
/// ```
/// use bolt_transport::{value, ValueSend};
///
/// assert_eq!(value!(null), ValueSend::Null);
/// assert_eq!(value!(true), ValueSend::Boolean(true));
/// assert_eq!(value!(1), ValueSend::Integer(1));
/// assert_eq!(value!("foo"), ValueSend::String(String::from("foo")));
/// assert_eq!(
///     value!(vec![1, 2]),
///     ValueSend::List(vec![ValueSend::Integer(1), ValueSend::Integer(2)])
/// );
/// ```
#[macro_export]
macro_rules! value {
    (null) => {
        $crate::ValueSend::Null
    };
    ($other:expr) => {
        $crate::ValueSend::from($other)
    };
}

/// Short notation for creating a `HashMap<String, ValueSend>`.
///
/// Values are converted with [`ValueSend::from`]; use [`value!`] for `null`.
///
/// # Example
/// ```
/// use bolt_transport::{value, value_map, ValueSend};
///
/// let map = value_map!({
///     "answer": 42,
///     "nothing": value!(null),
/// });
///
/// assert_eq!(map.get("answer"), Some(&ValueSend::Integer(42)));
/// assert_eq!(map.get("nothing"), Some(&ValueSend::Null));
/// ```
#[macro_export]
macro_rules! value_map {
    ({$($key:literal: $value:expr),* $(,)?}) => {
        {
            #[allow(unused_mut)]
            let mut m = std::collections::HashMap::new();
            $(
                m.insert(String::from($key), $crate::ValueSend::from($value));
            )*
            m
        }
    };
}
