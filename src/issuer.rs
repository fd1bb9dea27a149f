//! Issuer canonicalisation and tenant-aware matching.
//!
//! Multi-host providers publish the same tenant under several issuer spellings: with or without
//! a trailing slash, with an `/oauth2` or `/oidc` suffix, and on `api.`/`sts.` host aliases. All of
//! them reduce to one canonical form here.

/// Host labels treated as aliases of the bare domain.
const HOST_ALIAS_PREFIXES: [&str; 2] = ["api.", "sts."];
/// Path suffixes stripped from the end of an issuer.
const KNOWN_SUFFIXES: [&str; 2] = ["/oauth2", "/oidc"];

/// Reduce an issuer string to its canonical form.
///
/// Applying it twice yields the same result as applying it once.
pub fn canonicalize(issuer: &str) -> String {
	let trimmed = issuer.trim();
	let (scheme, rest) = match trimmed.split_once("://") {
		Some((scheme, rest)) => (Some(scheme), rest),
		None => (None, trimmed),
	};
	let (authority, path) = match rest.find('/') {
		Some(idx) => rest.split_at(idx),
		None => (rest, ""),
	};
	let host = canonical_host(authority.trim());
	let path = strip_path_suffixes(path);
	let mut out = String::with_capacity(trimmed.len());

	if let Some(scheme) = scheme {
		out.push_str(&scheme.to_ascii_lowercase());
		out.push_str("://");
	}

	out.push_str(&host);
	out.push_str(path);

	out
}

fn canonical_host(authority: &str) -> String {
	let mut host = authority.to_ascii_lowercase();

	while let Some(stripped) =
		HOST_ALIAS_PREFIXES.iter().find_map(|prefix| host.strip_prefix(prefix))
	{
		// Keep at least a registrable `domain.tld` pair.
		if !stripped.contains('.') {
			break;
		}

		host = stripped.to_owned();
	}

	host
}

fn strip_path_suffixes(mut path: &str) -> &str {
	loop {
		let before = path.len();

		path = path.trim_end_matches(|c: char| c == '/' || c.is_whitespace());

		for suffix in KNOWN_SUFFIXES {
			if let Some(stripped) = path.strip_suffix(suffix) {
				path = stripped;
			}
		}

		if path.len() == before {
			return path;
		}
	}
}

/// Extract the tenant identifier from a `/t/{tenant}` issuer path segment.
pub fn extract_tenant(issuer: &str) -> Option<String> {
	let (_, rest) = issuer.split_once("/t/")?;
	let tenant = rest.split('/').next().unwrap_or_default().trim();

	(!tenant.is_empty()).then(|| tenant.to_owned())
}

/// Matches token issuers against the configured one.
#[derive(Clone, Debug)]
pub struct IssuerMatcher {
	issuer: String,
	canonical: String,
	tenant: Option<String>,
	relaxed_tenant_match: bool,
}
impl IssuerMatcher {
	/// Build a matcher for the configured issuer.
	pub fn new(issuer: impl Into<String>, relaxed_tenant_match: bool) -> Self {
		let issuer = issuer.into();
		let canonical = canonicalize(&issuer);
		let tenant = extract_tenant(&canonical);

		Self { issuer, canonical, tenant, relaxed_tenant_match }
	}

	/// Issuer as configured (or as reported by discovery).
	pub fn issuer(&self) -> &str {
		&self.issuer
	}

	/// Canonical form of the configured issuer.
	pub fn canonical(&self) -> &str {
		&self.canonical
	}

	/// Tenant identifier extracted from the configured issuer path.
	pub fn tenant(&self) -> Option<&str> {
		self.tenant.as_deref()
	}

	/// Whether tenant-relaxed matching is enabled.
	pub fn relaxed_tenant_match(&self) -> bool {
		self.relaxed_tenant_match
	}

	/// Decide whether a token's `iss` claim is acceptable.
	pub fn matches(&self, token_issuer: &str) -> bool {
		if self.canonical.is_empty() {
			return false;
		}

		let candidate = canonicalize(token_issuer);

		if candidate == self.canonical {
			return true;
		}
		if !self.relaxed_tenant_match {
			return false;
		}

		match &self.tenant {
			Some(tenant) => {
				let accepted = contains_tenant_segment(&candidate, tenant);

				if accepted {
					tracing::debug!(
						expected = %self.canonical,
						actual = %candidate,
						tenant = %tenant,
						"issuer accepted through relaxed tenant match"
					);
				}

				accepted
			},
			None => false,
		}
	}
}

fn contains_tenant_segment(issuer: &str, tenant: &str) -> bool {
	let needle = format!("/t/{tenant}");

	issuer.match_indices(&needle).any(|(idx, _)| {
		matches!(issuer[idx + needle.len()..].chars().next(), None | Some('/'))
	})
}
