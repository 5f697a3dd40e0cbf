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

use std::collections::HashMap;

use crate::value::ValueSend;
use crate::value_map;

// imports for docs
#[allow(unused)]
use crate::driver::DriverConfig;
#[allow(unused)]
use crate::session::SessionConfig;

/// Authentication credentials, sent to the server as part of HELLO or LOGON.
///
/// Used with [`DriverConfig::with_auth()`] and
/// [`SessionConfig::with_session_auth()`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub(crate) data: HashMap<String, ValueSend>,
}

impl AuthToken {
    /// Token for servers that have authentication disabled.
    pub fn new_none_auth() -> Self {
        Self {
            data: value_map!({
                "scheme": "none",
            }),
        }
    }

    /// Username and password authentication.
    pub fn new_basic_auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            data: value_map!({
                "scheme": "basic",
                "principal": username.into(),
                "credentials": password.into(),
            }),
        }
    }

    /// Username and password authentication within a realm.
    pub fn new_basic_auth_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        let mut token = Self::new_basic_auth(username, password);
        token.data.insert("realm".into(), realm.into().into());
        token
    }

    /// Kerberos authentication from a base64 encoded ticket.
    pub fn new_kerberos_auth(base64_encoded_ticket: impl Into<String>) -> Self {
        Self {
            data: value_map!({
                "scheme": "kerberos",
                "principal": "",
                "credentials": base64_encoded_ticket.into(),
            }),
        }
    }

    /// Bearer authentication, e.g. a JWT from an SSO provider.
    pub fn new_bearer_auth(base64_encoded_token: impl Into<String>) -> Self {
        Self {
            data: value_map!({
                "scheme": "bearer",
                "credentials": base64_encoded_token.into(),
            }),
        }
    }

    /// Free-form token for servers with custom authentication plugins.
    ///
    /// Empty `credentials`, `realm`, and `parameters` are omitted from the
    /// token; a missing `scheme` is sent as null.
    pub fn new_custom_auth(
        principal: Option<String>,
        credentials: Option<String>,
        realm: Option<String>,
        scheme: Option<String>,
        parameters: Option<HashMap<String, ValueSend>>,
    ) -> Self {
        fn entry(
            data: &mut HashMap<String, ValueSend>,
            key: &str,
            value: Option<impl Into<ValueSend>>,
        ) {
            if let Some(value) = value {
                data.insert(key.into(), value.into());
            }
        }

        let mut data = HashMap::with_capacity(5);
        entry(&mut data, "principal", principal);
        entry(&mut data, "credentials", credentials.filter(|c| !c.is_empty()));
        entry(&mut data, "realm", realm.filter(|r| !r.is_empty()));
        data.insert("scheme".into(), scheme.into());
        entry(&mut data, "parameters", parameters.filter(|p| !p.is_empty()));
        Self { data }
    }

    /// Compare the data contained in this [`AuthToken`] with another one.
    ///
    /// Unlike `PartialEq`, floats are compared by their bit pattern
    /// (`NaN == NaN`, `0.0 != -0.0`).
    pub fn eq_data(&self, other: &Self) -> bool {
        self.data.len() == other.data.len()
            && self.data.iter().all(|(key, value)| {
                other
                    .data
                    .get(key)
                    .map(|other_value| value.eq_data(other_value))
                    .unwrap_or_default()
            })
    }

    /// Borrow the raw auth data to be sent to the server.
    pub fn data(&self) -> &HashMap<String, ValueSend> {
        &self.data
    }
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::new_none_auth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_entry(token: &AuthToken, key: &str) -> Option<String> {
        match token.data.get(key) {
            Some(ValueSend::String(value)) => Some(value.clone()),
            _ => None,
        }
    }

    #[test]
    fn basic_auth_has_expected_entries() {
        let token = AuthToken::new_basic_auth("user", "pass");
        assert_eq!(string_entry(&token, "scheme").as_deref(), Some("basic"));
        assert_eq!(string_entry(&token, "principal").as_deref(), Some("user"));
        assert_eq!(string_entry(&token, "credentials").as_deref(), Some("pass"));
    }

    #[test]
    fn custom_auth_drops_empty_optionals() {
        let token = AuthToken::new_custom_auth(
            Some("user".into()),
            Some("".into()),
            None,
            Some("scheme".into()),
            None,
        );
        assert_eq!(token.data.len(), 2);
        assert!(!token.data.contains_key("credentials"));
    }

    #[test]
    fn eq_data_ignores_entry_order_but_not_content() {
        let token1 = AuthToken::new_basic_auth("user", "pass");
        let token2 = AuthToken::new_basic_auth("user", "pass");
        let token3 = AuthToken::new_basic_auth("user", "other");
        assert!(token1.eq_data(&token2));
        assert!(!token1.eq_data(&token3));
    }
}
