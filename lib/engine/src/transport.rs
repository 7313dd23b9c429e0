use reqwest::{Client, RequestBuilder, Url};
use rustc_hash::FxHashMap;
use std::time::Duration;

/// Basic authentication credentials of a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

/// The HTTP client that is used for SPARQL endpoints, registries and compute services.
///
/// Requests are routed through a table of URL redirects and carry the basic authentication
/// credentials of their host, if any are known.
#[derive(Clone, Debug)]
pub struct Transport {
    client: Client,
    redirects: Vec<(String, String)>,
    credentials: FxHashMap<String, Credentials>,
}

impl Transport {
    /// Creates a new [Transport] whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            redirects: Vec::new(),
            credentials: FxHashMap::default(),
        })
    }

    /// Sends requests for URLs starting with `from` to `to` instead.
    #[must_use]
    pub fn with_redirect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.redirects.push((from.into(), to.into()));
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, host: impl Into<String>, credentials: Credentials) -> Self {
        self.credentials.insert(host.into(), credentials);
        self
    }

    /// Applies the first matching redirect to `url`.
    pub fn resolve(&self, url: &str) -> String {
        self.redirects
            .iter()
            .find_map(|(from, to)| url.strip_prefix(from.as_str()).map(|rest| format!("{to}{rest}")))
            .unwrap_or_else(|| url.to_owned())
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        let url = self.resolve(url);
        self.authenticate(self.client.get(&url), &url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        let url = self.resolve(url);
        self.authenticate(self.client.post(&url), &url)
    }

    fn authenticate(&self, request: RequestBuilder, url: &str) -> RequestBuilder {
        let credentials = Url::parse(url)
            .ok()
            .and_then(|url| url.host_str().and_then(|host| self.credentials.get(host)));
        match credentials {
            Some(credentials) => request.basic_auth(&credentials.user, credentials.password.as_ref()),
            None => request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HTTP_TIMEOUT;

    #[test]
    fn redirects_replace_the_matching_prefix() -> Result<(), reqwest::Error> {
        let transport = Transport::new(HTTP_TIMEOUT)?
            .with_redirect("http://public.example.com/", "http://localhost:7878/");
        assert_eq!(
            transport.resolve("http://public.example.com/sparql"),
            "http://localhost:7878/sparql"
        );
        assert_eq!(
            transport.resolve("http://other.example.com/sparql"),
            "http://other.example.com/sparql"
        );
        Ok(())
    }

    #[test]
    fn credentials_are_attached_per_host() -> Result<(), reqwest::Error> {
        let transport = Transport::new(HTTP_TIMEOUT)?.with_credentials(
            "data.example.com",
            Credentials {
                user: "reader".to_owned(),
                password: Some("secret".to_owned()),
            },
        );
        let request = transport.get("http://data.example.com/sparql").build()?;
        assert!(request
            .headers()
            .contains_key(reqwest::header::AUTHORIZATION));
        let request = transport.get("http://other.example.com/sparql").build()?;
        assert!(!request
            .headers()
            .contains_key(reqwest::header::AUTHORIZATION));
        Ok(())
    }
}
