// Trust root resolution
//
// Name-based classification of chains against a log's accepted roots. This is
// a heuristic over subject/issuer distinguished names; no signature or path
// validation is performed.

use super::client::LogApi;
use super::Result;
use crate::utils::retry::{retry_with_backoff, RetryConfig};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use x509_parser::prelude::*;

/// Outcome of matching a chain against the root set
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootMatch {
    /// First matching root DN, `None` when the chain is unresolved
    pub root_dn: Option<String>,
    /// At least one certificate in the chain failed to decode
    pub unparseable: bool,
}

impl RootMatch {
    pub fn is_unresolved(&self) -> bool {
        self.root_dn.is_none()
    }
}

/// Accepted root DNs for one log. Populated once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TrustRoots {
    roots: HashSet<String>,
    parse_failures: u64,
}

impl TrustRoots {
    /// Build the set from DER certificates, counting and skipping failures
    pub fn from_der_certs<I>(certs: I) -> Self
    where
        I: IntoIterator<Item = Result<Vec<u8>>>,
    {
        let mut roots = HashSet::new();
        let mut parse_failures = 0;

        for cert in certs {
            let der = match cert {
                Ok(der) => der,
                Err(e) => {
                    debug!("Skipping undecodable root: {}", e);
                    parse_failures += 1;
                    continue;
                }
            };

            match X509Certificate::from_der(&der) {
                Ok((_, root)) => match distinguished_name(root.subject()) {
                    Some(dn) => {
                        roots.insert(dn);
                    }
                    None => {
                        debug!("Skipping root with empty subject");
                        parse_failures += 1;
                    }
                },
                Err(e) => {
                    debug!("Skipping unparseable root: {}", e);
                    parse_failures += 1;
                }
            }
        }

        Self {
            roots,
            parse_failures,
        }
    }

    /// Build directly from DN strings
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roots: names.into_iter().map(Into::into).collect(),
            parse_failures: 0,
        }
    }

    /// Fetch and decode the log's accepted roots
    pub async fn populate(
        api: &dyn LogApi,
        retry: &RetryConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let certs = retry_with_backoff(retry, cancel, |_, _| {}, || api.get_roots(cancel)).await?;
        let roots = Self::from_der_certs(certs);

        if roots.parse_failures > 0 {
            warn!(
                "Skipped {} unparseable root certificate(s)",
                roots.parse_failures
            );
        }
        info!("Loaded {} accepted root names", roots.len());
        Ok(roots)
    }

    pub fn contains(&self, dn: &str) -> bool {
        self.roots.contains(dn)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of roots that could not be decoded
    pub fn parse_failures(&self) -> u64 {
        self.parse_failures
    }

    /// Walk the chain leaf-first; the first certificate whose issuer or
    /// subject DN is an accepted root decides the match.
    pub fn find_root<C: AsRef<[u8]>>(&self, chain: &[C]) -> RootMatch {
        let mut result = RootMatch::default();

        for der in chain {
            let cert = match X509Certificate::from_der(der.as_ref()) {
                Ok((_, cert)) => cert,
                Err(_) => {
                    result.unparseable = true;
                    continue;
                }
            };

            if let Some(issuer) = distinguished_name(cert.issuer()) {
                if self.roots.contains(&issuer) {
                    result.root_dn = Some(issuer);
                    return result;
                }
            }
            if let Some(subject) = distinguished_name(cert.subject()) {
                if self.roots.contains(&subject) {
                    result.root_dn = Some(subject);
                    return result;
                }
            }
        }

        result
    }
}

/// Canonical DN string: `CN=..; O=[..]; OU=[..]; L=[..]; ST=[..]; C=[..]`.
///
/// Fields appear in that fixed order; multi-valued fields are joined with
/// `", "`. Returns `None` when none of the fields are present.
pub fn distinguished_name(name: &X509Name<'_>) -> Option<String> {
    fn values<'a, 'b: 'a>(iter: impl Iterator<Item = &'a AttributeTypeAndValue<'b>>) -> Vec<String> {
        iter.filter_map(|attr| attr.as_str().ok())
            .map(str::to_string)
            .collect()
    }

    let fields = DnFields {
        common_name: values(name.iter_common_name()),
        organization: values(name.iter_organization()),
        organizational_unit: values(name.iter_organizational_unit()),
        locality: values(name.iter_locality()),
        province: values(name.iter_state_or_province()),
        country: values(name.iter_country()),
    };
    fields.render()
}

/// Extracted name components, in rendering order
#[derive(Debug, Default, Clone)]
pub struct DnFields {
    pub common_name: Vec<String>,
    pub organization: Vec<String>,
    pub organizational_unit: Vec<String>,
    pub locality: Vec<String>,
    pub province: Vec<String>,
    pub country: Vec<String>,
}

impl DnFields {
    pub fn render(&self) -> Option<String> {
        let mut out = Vec::new();
        if !self.common_name.is_empty() {
            out.push(format!("CN={}", self.common_name.join(", ")));
        }
        let lists = [
            ("O", &self.organization),
            ("OU", &self.organizational_unit),
            ("L", &self.locality),
            ("ST", &self.province),
            ("C", &self.country),
        ];
        for (label, values) in lists {
            if !values.is_empty() {
                out.push(format!("{}=[{}]", label, values.join(", ")));
            }
        }

        if out.is_empty() {
            None
        } else {
            Some(out.join("; "))
        }
    }
}
