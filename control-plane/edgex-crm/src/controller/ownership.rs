//! Shared ownership of generated children.
//!
//! A child may list several EdgeX parents as owners. Owners are matched by
//! uid and the list behaves as a set: adding is idempotent and removing the
//! last owner tells the caller to delete the object.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::crd::EdgeX;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl ParentRef {
    /// `None` until the API server has assigned a uid.
    pub fn from_edgex(edgex: &EdgeX) -> Option<Self> {
        Some(Self {
            api_version: EdgeX::api_version(&()).into_owned(),
            kind: EdgeX::kind(&()).into_owned(),
            name: edgex.name_any(),
            uid: edgex.uid()?,
        })
    }

    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            ..Default::default()
        }
    }
}

/// What to do with a child after dropping a parent from its owners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// The parent was not an owner; nothing changed.
    NotOwned,
    /// No owners remain.
    Delete,
    /// Other owners remain; persist the shortened list.
    Keep,
}

pub fn is_owned_by(meta: &ObjectMeta, parent: &ParentRef) -> bool {
    meta.owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == parent.uid))
}

/// Returns whether the owner list changed.
pub fn add_owner(meta: &mut ObjectMeta, parent: &ParentRef) -> bool {
    if is_owned_by(meta, parent) {
        return false;
    }
    meta.owner_references
        .get_or_insert_with(Vec::new)
        .push(parent.owner_reference());
    true
}

pub fn remove_owner(meta: &mut ObjectMeta, parent: &ParentRef) -> Release {
    let Some(refs) = meta.owner_references.as_mut() else {
        return Release::NotOwned;
    };
    let before = refs.len();
    refs.retain(|r| r.uid != parent.uid);
    if refs.len() == before {
        Release::NotOwned
    } else if refs.is_empty() {
        Release::Delete
    } else {
        Release::Keep
    }
}
