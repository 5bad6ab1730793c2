use std::collections::HashMap;

/// The env-style credential document (`ibm-credentials.env`) stored in the
/// `ibm-cloud-credentials` secret.
///
/// One `KEY=VALUE` pair per line; blank lines and `#` comments are skipped and values may
/// be wrapped in single or double quotes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialEnv {
    values: HashMap<String, String>,
}

impl CredentialEnv {
    /// Authentication type (`iam` or `pod-identity`).
    pub const AUTH_TYPE: &'static str = "IBMCLOUD_AUTHTYPE";
    /// API key, used with the `iam` authentication type.
    pub const API_KEY: &'static str = "IBMCLOUD_APIKEY";
    /// Trusted profile id, used with the `pod-identity` authentication type.
    pub const PROFILE_ID: &'static str = "IBMCLOUD_PROFILEID";
    /// `true` when the API key is encrypted.
    pub const ENCRYPTION: &'static str = "IBMCLOUD_ENCRYPTION";
    /// Optional token exchange endpoint.
    pub const TOKEN_EXCHANGE_URL: &'static str = "IBMCLOUD_TOKEN_EXCHANGE_URL";

    /// Parses the document. Malformed lines (without `=`) are ignored.
    pub fn parse(data: &str) -> Self {
        let values = data
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_owned(), unquote(value.trim()).to_owned()))
            .collect();

        Self { values }
    }

    /// Value of `key`, or `None` when absent or empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Whether the document marks its key material as encrypted.
    pub fn encrypted(&self) -> bool {
        self.get(Self::ENCRYPTION)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
