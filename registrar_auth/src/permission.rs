//! Permissions granted by a token and the check against a required one
//!
//! Permission strings are opaque. `get:students` and `students:get` are just
//! different strings; no naming convention, hierarchy or wildcard is
//! interpreted here. Matching is exact and case-sensitive.

use std::collections::{btree_set, BTreeSet};

use aliri_braid::braid;
use serde::{Deserialize, Serialize};

use crate::{error::AuthError, jwt::DecodedClaims};

/// A capability asserted by a token or demanded by an operation
#[braid(serde, ref_doc = "A borrowed reference to a [`Permission`]")]
pub struct Permission;

/// The set of permissions carried in a token's `permissions` claim
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
#[must_use]
pub struct Permissions(BTreeSet<Permission>);

impl Permissions {
    /// An empty permission set
    pub const fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Whether the exact permission is present
    #[inline]
    #[must_use]
    pub fn contains(&self, permission: &PermissionRef) -> bool {
        self.0.contains(permission)
    }

    /// Whether no permissions are granted
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of permissions granted
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates the granted permissions in lexical order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            iter: self.0.iter(),
        }
    }
}

impl<P: Into<Permission>> FromIterator<P> for Permissions {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// An iterator over a set of borrowed permissions
#[derive(Clone, Debug)]
pub struct Iter<'a> {
    iter: btree_set::Iter<'a, Permission>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a PermissionRef;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(AsRef::as_ref)
    }
}

impl<'a> IntoIterator for &'a Permissions {
    type Item = &'a PermissionRef;
    type IntoIter = Iter<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Confirms that verified claims carry a required permission
///
/// # Errors
///
/// * [`AuthError::PermissionsClaimMissing`] if the token had no
///   `permissions` claim at all
/// * [`AuthError::PermissionDenied`] if the claim is present but lacks
///   `required`
pub fn check(claims: &DecodedClaims, required: &PermissionRef) -> Result<(), AuthError> {
    let granted = claims
        .permissions()
        .ok_or(AuthError::PermissionsClaimMissing)?;

    if granted.contains(required) {
        Ok(())
    } else {
        tracing::trace!(%required, granted = granted.len(), "required permission not granted");
        Err(AuthError::PermissionDenied {
            required: required.as_str().to_owned(),
        })
    }
}
