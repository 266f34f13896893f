//! Versioned data items and the per-device store that replicates them
//!
//! An [`Artifact`] is one version of a resource. Its age is the time since
//! the version was generated, so a smaller age means a newer version. An
//! [`ArtifactContainer`] keeps the newest known version of each resource,
//! sorted by resource id.

use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;

/// Identifier of the resource an artifact is a version of (always >= 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(u32);

impl ResourceId {
    pub fn new(id: u32) -> Result<Self, ArtifactError> {
        if id < 1 {
            return Err(ArtifactError::InvalidResourceId(id));
        }
        Ok(Self(id))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// One version of a resource
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    resource: ResourceId,
    age: f64,
}

impl Artifact {
    pub fn new(resource: ResourceId, age: f64) -> Result<Self, ArtifactError> {
        if age < 0.0 {
            return Err(ArtifactError::NegativeAge(age));
        }
        Ok(Self { resource, age })
    }

    /// A freshly generated version (age 0)
    pub fn fresh(resource: ResourceId) -> Self {
        Self { resource, age: 0.0 }
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn age(&self) -> f64 {
        self.age
    }

    /// Grow older by `increment`; negative increments are ignored
    pub fn advance_age(&mut self, increment: f64) {
        if increment > 0.0 {
            self.age += increment;
        }
    }

    /// Whether this version is strictly newer (younger) than `other`
    pub fn is_newer_than(&self, other: &Artifact) -> bool {
        self.age < other.age
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Artifact {} age {:.3}>", self.resource, self.age)
    }
}

/// Newest-known version of each resource held by a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactContainer {
    /// Sorted by resource id, at most one entry per id
    artifacts: Vec<Artifact>,
}

impl ArtifactContainer {
    pub fn new() -> Self {
        Self {
            artifacts: Vec::new(),
        }
    }

    fn position(&self, resource: ResourceId) -> Result<usize, usize> {
        self.artifacts.binary_search_by_key(&resource, |a| a.resource)
    }

    /// Insert an artifact
    ///
    /// A stored version is replaced only by a strictly newer one; an equal
    /// or older incoming version is an error.
    pub fn add(&mut self, artifact: Artifact) -> Result<(), ArtifactError> {
        match self.position(artifact.resource) {
            Err(idx) => {
                self.artifacts.insert(idx, artifact);
                Ok(())
            }
            Ok(idx) => {
                let existing = self.artifacts[idx];
                if !artifact.is_newer_than(&existing) {
                    return Err(ArtifactError::NotNewer {
                        resource: artifact.resource.get(),
                        existing: existing.age,
                        incoming: artifact.age,
                    });
                }
                self.artifacts[idx] = artifact;
                Ok(())
            }
        }
    }

    /// Insert copies of every artifact in `artifacts`
    pub fn copy_all(&mut self, artifacts: &[Artifact]) -> Result<(), ArtifactError> {
        for artifact in artifacts {
            self.add(*artifact)?;
        }
        Ok(())
    }

    /// Artifacts in `other` that this container lacks or holds an older version of
    pub fn transfer_from(&self, other: &ArtifactContainer) -> Vec<Artifact> {
        other
            .artifacts
            .iter()
            .filter(|theirs| match self.get(theirs.resource) {
                None => true,
                Some(ours) => theirs.is_newer_than(ours),
            })
            .copied()
            .collect()
    }

    /// Stored version of a resource
    pub fn get(&self, resource: ResourceId) -> Option<&Artifact> {
        self.position(resource).ok().map(|idx| &self.artifacts[idx])
    }

    pub fn contains(&self, resource: ResourceId) -> bool {
        self.position(resource).is_ok()
    }

    /// Age every stored artifact by `increment`
    pub fn advance_ages(&mut self, increment: f64) {
        for artifact in &mut self.artifacts {
            artifact.advance_age(increment);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    pub fn list(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

impl<'a> IntoIterator for &'a ArtifactContainer {
    type Item = &'a Artifact;
    type IntoIter = std::slice::Iter<'a, Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.iter()
    }
}
