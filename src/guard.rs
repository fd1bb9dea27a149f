//! Scope-based authorization over verified claims.

// self
use crate::{claims::Claims, validator::AuthError};

/// Scopes a route requires, checked in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequiredScopes(Vec<String>);
impl RequiredScopes {
	/// Build the requirement; blank entries and duplicates are dropped, order is kept.
	pub fn new<I, S>(scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut required = Vec::new();

		for scope in scopes {
			let scope = scope.into().trim().to_owned();

			if !scope.is_empty() && !required.contains(&scope) {
				required.push(scope);
			}
		}

		Self(required)
	}

	/// Required scopes in check order.
	pub fn scopes(&self) -> &[String] {
		&self.0
	}

	/// Fail with the first required scope the claims do not grant.
	pub fn check(&self, claims: &Claims) -> Result<(), AuthError> {
		let granted = claims.scopes();

		match self.0.iter().find(|scope| !granted.contains(scope.as_str())) {
			Some(missing) => Err(AuthError::MissingScope(missing.clone())),
			None => Ok(()),
		}
	}
}
