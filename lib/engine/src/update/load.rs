//! Fetching and parsing of remote RDF for `LOAD`.

use crate::EngineError;
use oxrdfio::{RdfFormat, RdfParseError, RdfParser};
use quadsql_common::EngineConfig;
use quadsql_model::{GraphName, NamedNode, Quad};

/// The HTTP client used by `LOAD`, with its own timeout and size ceiling.
pub(crate) struct LoadClient {
    client: reqwest::Client,
}

impl LoadClient {
    pub fn new(config: &EngineConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.load_timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Dereferences `source`, enforcing the scheme/host allow-lists and the
    /// byte ceiling while the body streams in.
    pub async fn fetch(
        &self,
        config: &EngineConfig,
        source: &str,
    ) -> Result<(Vec<u8>, Option<String>), EngineError> {
        let url = reqwest::Url::parse(source)
            .map_err(|e| EngineError::Transfer(format!("invalid LOAD source {source}: {e}")))?;
        if !config
            .load_allowed_schemes
            .iter()
            .any(|scheme| scheme == url.scheme())
        {
            return Err(EngineError::Transfer(format!(
                "scheme {} is not allowed for LOAD",
                url.scheme()
            )));
        }
        if let Some(allowed_hosts) = &config.load_allowed_hosts {
            let host = url.host_str().unwrap_or_default();
            if !allowed_hosts.iter().any(|allowed| allowed == host) {
                return Err(EngineError::Transfer(format!(
                    "host {host} is not allowed for LOAD"
                )));
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::Transfer(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Transfer(format!(
                "{source} answered {}",
                response.status()
            )));
        }
        if let Some(length) = response.content_length() {
            if length > config.load_max_size {
                return Err(EngineError::Transfer(format!(
                    "response of {length} bytes exceeds the LOAD ceiling"
                )));
            }
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_owned());

        let mut bytes = Vec::new();
        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EngineError::Transfer(e.to_string()))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > config.load_max_size {
                return Err(EngineError::Transfer(
                    "response exceeds the LOAD ceiling".to_owned(),
                ));
            }
        }
        Ok((bytes, content_type))
    }
}

/// Parses fetched bytes into quads targeting `destination` (or the global
/// graph). The format comes from the Content-Type header, falling back to
/// the URL extension.
pub(crate) fn parse_fetched_rdf(
    bytes: &[u8],
    content_type: Option<&str>,
    source: &str,
    destination: &GraphName,
    global_graph_iri: &str,
) -> Result<Vec<Quad>, EngineError> {
    let format = content_type
        .and_then(RdfFormat::from_media_type)
        .or_else(|| {
            source
                .rsplit_once('.')
                .and_then(|(_, extension)| RdfFormat::from_extension(extension))
        })
        .ok_or_else(|| {
            EngineError::Transfer(format!(
                "cannot determine the RDF format of {source} (content type {content_type:?})"
            ))
        })?;

    let target = match destination {
        GraphName::NamedNode(n) => n.clone(),
        GraphName::BlankNode(_) => {
            return Err(EngineError::Transfer(
                "cannot LOAD into a blank node graph".to_owned(),
            ))
        }
        GraphName::DefaultGraph => NamedNode::new(global_graph_iri)
            .map_err(|e| EngineError::Internal(format!("invalid global graph IRI: {e}")))?,
    };

    RdfParser::from_format(format)
        .without_named_graphs()
        .with_default_graph(target)
        .rename_blank_nodes()
        .for_slice(bytes)
        .map(|quad| quad.map_err(|e| EngineError::GraphParsing(RdfParseError::from(e))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadsql_model::GraphName;

    #[test]
    fn turtle_lands_in_the_global_graph_by_default() {
        let quads = parse_fetched_rdf(
            b"<http://ex/a> <http://ex/p> <http://ex/b> .",
            Some("text/turtle"),
            "http://remote.example/data.ttl",
            &GraphName::DefaultGraph,
            "urn:___GLOBAL",
        )
        .unwrap();
        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0].graph_name.to_string(), "<urn:___GLOBAL>");
    }

    #[test]
    fn destination_graph_overrides_the_default() {
        let quads = parse_fetched_rdf(
            b"<http://ex/a> <http://ex/p> \"x\" .",
            Some("text/turtle"),
            "http://remote.example/data.ttl",
            &GraphName::NamedNode(NamedNode::new_unchecked("http://ex/g")),
            "urn:___GLOBAL",
        )
        .unwrap();
        assert_eq!(quads[0].graph_name.to_string(), "<http://ex/g>");
    }

    #[test]
    fn format_falls_back_to_the_url_extension() {
        let quads = parse_fetched_rdf(
            b"<http://ex/a> <http://ex/p> <http://ex/b> .",
            None,
            "http://remote.example/data.nt",
            &GraphName::DefaultGraph,
            "urn:___GLOBAL",
        )
        .unwrap();
        assert_eq!(quads.len(), 1);
    }

    #[test]
    fn unknown_formats_are_a_transfer_error() {
        let error = parse_fetched_rdf(
            b"whatever",
            Some("application/octet-stream"),
            "http://remote.example/data.bin",
            &GraphName::DefaultGraph,
            "urn:___GLOBAL",
        )
        .unwrap_err();
        assert!(matches!(error, EngineError::Transfer(_)));
    }

    #[tokio::test]
    async fn disallowed_schemes_are_rejected_before_any_network_use() {
        let config = EngineConfig::default();
        let client = LoadClient::new(&config);
        let error = client
            .fetch(&config, "ftp://remote.example/data.ttl")
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Transfer(_)));
    }

    #[tokio::test]
    async fn hosts_outside_the_allow_list_are_rejected() {
        let config = EngineConfig {
            load_allowed_hosts: Some(vec!["trusted.example".to_owned()]),
            ..EngineConfig::default()
        };
        let client = LoadClient::new(&config);
        let error = client
            .fetch(&config, "http://other.example/data.ttl")
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Transfer(_)));
    }
}
