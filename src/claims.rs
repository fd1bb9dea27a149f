//! Verified token claims with provider-tolerant accessors.

// std
use std::collections::{BTreeMap, BTreeSet, btree_map};
// crates.io
use serde::{Deserialize, Serialize};
use serde_json::Number;

/// A single claim value as it appeared in the token payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
	/// JSON `null`.
	Null,
	/// JSON boolean.
	Bool(bool),
	/// JSON number.
	Number(Number),
	/// JSON string.
	String(String),
	/// JSON array.
	Array(Vec<ClaimValue>),
	/// JSON object.
	Object(BTreeMap<String, ClaimValue>),
}
impl ClaimValue {
	/// String content, if this is a string.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(value) => Some(value),
			_ => None,
		}
	}

	/// Boolean content, if this is a boolean.
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(value) => Some(*value),
			_ => None,
		}
	}

	/// Integer content, if this is a number representable as `i64`.
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Number(value) => value.as_i64(),
			_ => None,
		}
	}

	/// Floating point content, if this is a number.
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Self::Number(value) => value.as_f64(),
			_ => None,
		}
	}

	/// Array content, if this is an array.
	pub fn as_array(&self) -> Option<&[ClaimValue]> {
		match self {
			Self::Array(values) => Some(values),
			_ => None,
		}
	}

	/// Object content, if this is an object.
	pub fn as_object(&self) -> Option<&BTreeMap<String, ClaimValue>> {
		match self {
			Self::Object(map) => Some(map),
			_ => None,
		}
	}

	/// String members of an array, skipping any other element types.
	///
	/// Returns `None` when the value is not an array.
	pub fn string_items(&self) -> Option<Vec<&str>> {
		self.as_array().map(|values| values.iter().filter_map(ClaimValue::as_str).collect())
	}
}

/// Claims of a verified token.
///
/// Created once per authenticated request; there are no mutating accessors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(BTreeMap<String, ClaimValue>);
impl Claims {
	/// Raw claim lookup.
	pub fn get(&self, name: &str) -> Option<&ClaimValue> {
		self.0.get(name)
	}

	/// String claim lookup.
	pub fn get_str(&self, name: &str) -> Option<&str> {
		self.get(name).and_then(ClaimValue::as_str)
	}

	/// Whether the claim is present.
	pub fn contains(&self, name: &str) -> bool {
		self.0.contains_key(name)
	}

	/// Iterate over every claim in name order.
	pub fn iter(&self) -> btree_map::Iter<'_, String, ClaimValue> {
		self.0.iter()
	}

	/// Number of claims.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Whether there are no claims at all.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// `sub` claim.
	pub fn subject(&self) -> Option<&str> {
		self.get_str("sub")
	}

	/// `email` claim.
	pub fn email(&self) -> Option<&str> {
		self.get_str("email")
	}

	/// `iss` claim.
	pub fn issuer(&self) -> Option<&str> {
		self.get_str("iss")
	}

	/// `aud` claim in either its string or array form.
	pub fn audiences(&self) -> Vec<&str> {
		match self.get("aud") {
			Some(ClaimValue::String(aud)) => vec![aud.as_str()],
			Some(value) => value.string_items().unwrap_or_default(),
			None => Vec::new(),
		}
	}

	/// `exp` claim as seconds since the epoch.
	pub fn expires_at(&self) -> Option<i64> {
		self.numeric_date("exp")
	}

	/// `nbf` claim as seconds since the epoch.
	pub fn not_before(&self) -> Option<i64> {
		self.numeric_date("nbf")
	}

	/// Granted scopes.
	///
	/// A non-empty space-delimited `scope` string wins; otherwise a non-empty `scp` array of
	/// strings is used.
	pub fn scopes(&self) -> BTreeSet<String> {
		if let Some(scope) = self.get_str("scope")
			&& !scope.trim().is_empty()
		{
			return scope.split_whitespace().map(str::to_owned).collect();
		}

		self.non_empty_strings("scp")
			.map(|items| items.into_iter().map(str::to_owned).collect())
			.unwrap_or_default()
	}

	/// Granted roles.
	///
	/// Checked in order: `roles` as an array, `roles` as a space- or comma-delimited string, then
	/// `groups` as an array. The first non-empty source wins.
	pub fn roles(&self) -> Vec<String> {
		if let Some(items) = self.non_empty_strings("roles") {
			return items.into_iter().map(str::to_owned).collect();
		}

		if let Some(raw) = self.get_str("roles") {
			let separator = if raw.contains(' ') { ' ' } else { ',' };
			let roles: Vec<String> = raw
				.split(separator)
				.map(str::trim)
				.filter(|role| !role.is_empty())
				.map(str::to_owned)
				.collect();

			if !roles.is_empty() {
				return roles;
			}
		}

		self.non_empty_strings("groups")
			.map(|items| items.into_iter().map(str::to_owned).collect())
			.unwrap_or_default()
	}

	fn non_empty_strings(&self, name: &str) -> Option<Vec<&str>> {
		self.get(name).and_then(ClaimValue::string_items).filter(|items| !items.is_empty())
	}

	fn numeric_date(&self, name: &str) -> Option<i64> {
		match self.get(name)? {
			ClaimValue::Number(number) =>
				number.as_i64().or_else(|| number.as_f64().map(|value| value.floor() as i64)),
			_ => None,
		}
	}
}
impl FromIterator<(String, ClaimValue)> for Claims {
	fn from_iter<I>(iter: I) -> Self
	where
		I: IntoIterator<Item = (String, ClaimValue)>,
	{
		Self(iter.into_iter().collect())
	}
}
impl<'a> IntoIterator for &'a Claims {
	type IntoIter = btree_map::Iter<'a, String, ClaimValue>;
	type Item = (&'a String, &'a ClaimValue);

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}
