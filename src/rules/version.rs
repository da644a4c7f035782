//! Dotted numeric versions (`1`, `2.0`, `10.3.1.7`).
use std::cmp::Ordering;

/// A parsed dotted numeric version.
///
/// Comparison pads the shorter version with zeros, so `1.0` equals `1.0.0`.
#[derive(Debug, Clone)]
pub struct Version(Vec<u64>);

impl Version {
    /// Parse a version. Returns `None` unless every segment is a non-empty run of ASCII digits.
    pub fn parse(s: &str) -> Option<Version> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        s.split('.')
            .map(|segment| {
                if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                    None
                } else {
                    segment.parse().ok()
                }
            })
            .collect::<Option<Vec<u64>>>()
            .map(Version)
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| {
                let a = self.0.get(i).copied().unwrap_or(0);
                let b = other.0.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

#[cfg(test)]
mod tests {
    use super::Version;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parse() {
        assert_eq!(v("1.2.3").segments(), &[1, 2, 3]);
        assert_eq!(v(" 7 ").segments(), &[7]);
        assert!(Version::parse("").is_none());
        assert!(Version::parse("abc").is_none());
        assert!(Version::parse("1..2").is_none());
        assert!(Version::parse("1.2-beta").is_none());
        assert!(Version::parse("-1").is_none());
    }

    #[test]
    fn ordering() {
        assert!(v("0.9.9") < v("1.0"));
        assert!(v("1.10.0") > v("1.2.0"));
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("2") > v("1.99.99"));
    }
}
