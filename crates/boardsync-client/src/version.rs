//! Plugin version comparison for the status broadcast.

use semver::Version;

/// How a broadcast plugin version relates to the version this client runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionChange {
    Newer,
    Same,
    Older,
}

impl VersionChange {
    pub fn classify(remote: &Version, local: &Version) -> Self {
        match remote.cmp(local) {
            std::cmp::Ordering::Greater => Self::Newer,
            std::cmp::Ordering::Equal => Self::Same,
            std::cmp::Ordering::Less => Self::Older,
        }
    }

    /// Parse the remote version string and classify it.
    pub fn from_remote(remote: &str, local: &Version) -> Result<Self, semver::Error> {
        Ok(Self::classify(&Version::parse(remote)?, local))
    }

    /// A newer build is deployed; the user should be told to reload.
    pub fn signals_update(&self) -> bool {
        *self == Self::Newer
    }

    /// The server re-registered its handlers; subscriptions must be renewed.
    pub fn requires_resubscribe(&self) -> bool {
        matches!(self, Self::Newer | Self::Same)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn classifies_by_semver_order() {
        assert_eq!(VersionChange::classify(&v("7.2.0"), &v("7.1.9")), VersionChange::Newer);
        assert_eq!(VersionChange::classify(&v("7.1.0"), &v("7.1.0")), VersionChange::Same);
        assert_eq!(VersionChange::classify(&v("7.0.10"), &v("7.1.0")), VersionChange::Older);
        // Numeric, not lexical.
        assert_eq!(VersionChange::classify(&v("7.10.0"), &v("7.9.0")), VersionChange::Newer);
    }

    #[test]
    fn prerelease_sorts_before_release() {
        assert_eq!(VersionChange::classify(&v("7.1.0-rc.1"), &v("7.1.0")), VersionChange::Older);
        assert_eq!(VersionChange::classify(&v("7.1.0"), &v("7.1.0-rc.1")), VersionChange::Newer);
    }

    #[test]
    fn decisions() {
        assert!(VersionChange::Newer.signals_update());
        assert!(VersionChange::Newer.requires_resubscribe());
        assert!(!VersionChange::Same.signals_update());
        assert!(VersionChange::Same.requires_resubscribe());
        assert!(!VersionChange::Older.signals_update());
        assert!(!VersionChange::Older.requires_resubscribe());
    }

    #[test]
    fn rejects_malformed_remote() {
        assert!(VersionChange::from_remote("seven", &v("1.0.0")).is_err());
        assert_eq!(VersionChange::from_remote("1.0.1", &v("1.0.0")).unwrap(), VersionChange::Newer);
    }
}
