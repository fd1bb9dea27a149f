//! Immutable key snapshots built from JWKS documents.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use jsonwebtoken::{
	Algorithm, DecodingKey,
	jwk::{AlgorithmParameters, Jwk, KeyAlgorithm, PublicKeyUse},
};
use serde::Deserialize;
// self
use crate::_prelude::*;

/// Raw JWKS document; keys are parsed one by one so a single odd entry cannot poison the set.
#[derive(Debug, Default, Deserialize)]
pub struct JwksDocument {
	/// Unparsed key entries.
	#[serde(default)]
	pub keys: Vec<serde_json::Value>,
}

/// A signature verification key selected by `kid`.
pub struct VerificationKey {
	kid: String,
	algorithm: Option<Algorithm>,
	decoding_key: DecodingKey,
}
impl VerificationKey {
	/// Build a verification key from a parsed JWK.
	///
	/// Returns `None` for keys that cannot verify signatures: no `kid`, encryption-only use,
	/// symmetric (`oct`) material, non-signature algorithms, or parameters the backend rejects.
	pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
		let kid = jwk.common.key_id.as_deref().map(str::trim).filter(|kid| !kid.is_empty())?;

		if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
			return None;
		}
		if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
			return None;
		}

		let algorithm = match &jwk.common.key_algorithm {
			Some(declared) => Some(signature_algorithm(declared)?),
			None => None,
		};
		let decoding_key = DecodingKey::from_jwk(jwk)
			.inspect_err(|err| tracing::debug!(kid, error = %err, "skipping unusable JWK"))
			.ok()?;

		Some(Self { kid: kid.to_owned(), algorithm, decoding_key })
	}

	/// Key identifier.
	pub fn kid(&self) -> &str {
		&self.kid
	}

	/// Algorithm pinned by the JWK `alg` member, if any.
	pub fn algorithm(&self) -> Option<Algorithm> {
		self.algorithm
	}

	/// Key material for `jsonwebtoken::decode`.
	pub fn decoding_key(&self) -> &DecodingKey {
		&self.decoding_key
	}
}
impl Debug for VerificationKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("VerificationKey")
			.field("kid", &self.kid)
			.field("algorithm", &self.algorithm)
			.finish_non_exhaustive()
	}
}

/// Snapshot of usable verification keys, replaced whole on every refresh.
#[derive(Debug)]
pub struct KeySet {
	keys: HashMap<String, Arc<VerificationKey>>,
	refreshed_at: DateTime<Utc>,
}
impl KeySet {
	/// Build a snapshot from a JWKS document, keeping only usable signature keys.
	pub fn from_document(document: JwksDocument) -> Self {
		let mut keys = HashMap::with_capacity(document.keys.len());

		for raw in document.keys {
			let jwk = match serde_json::from_value::<Jwk>(raw) {
				Ok(jwk) => jwk,
				Err(err) => {
					tracing::debug!(error = %err, "skipping malformed JWK");

					continue;
				},
			};

			if let Some(key) = VerificationKey::from_jwk(&jwk) {
				keys.insert(key.kid.clone(), Arc::new(key));
			}
		}

		Self { keys, refreshed_at: Utc::now() }
	}

	/// Empty snapshot, used before the first successful fetch.
	pub fn empty() -> Self {
		Self { keys: HashMap::new(), refreshed_at: DateTime::<Utc>::UNIX_EPOCH }
	}

	/// Look up a key by `kid`.
	pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
		self.keys.get(kid).cloned()
	}

	/// Number of usable keys.
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	/// Whether the snapshot holds no usable key.
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	/// Sorted key identifiers.
	pub fn kids(&self) -> Vec<String> {
		let mut kids: Vec<String> = self.keys.keys().cloned().collect();

		kids.sort_unstable();

		kids
	}

	/// When this snapshot was fetched.
	pub fn refreshed_at(&self) -> DateTime<Utc> {
		self.refreshed_at
	}
}

fn signature_algorithm(declared: &KeyAlgorithm) -> Option<Algorithm> {
	let algorithm = match declared {
		KeyAlgorithm::RS256 => Algorithm::RS256,
		KeyAlgorithm::RS384 => Algorithm::RS384,
		KeyAlgorithm::RS512 => Algorithm::RS512,
		KeyAlgorithm::PS256 => Algorithm::PS256,
		KeyAlgorithm::PS384 => Algorithm::PS384,
		KeyAlgorithm::PS512 => Algorithm::PS512,
		KeyAlgorithm::ES256 => Algorithm::ES256,
		KeyAlgorithm::ES384 => Algorithm::ES384,
		KeyAlgorithm::EdDSA => Algorithm::EdDSA,
		_ => return None,
	};

	Some(algorithm)
}
