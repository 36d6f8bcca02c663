/// One key or a list of keys, as accepted by `subscribe`, `reset_keys` and
/// `create_computed`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Keys(Vec<String>);

impl Keys {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Drop repeated keys, keeping first occurrences in order.
    pub(crate) fn dedup(self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.0.len());
        for key in self.0 {
            if !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }
}

impl From<&str> for Keys {
    fn from(key: &str) -> Self {
        Keys(vec![key.to_string()])
    }
}

impl From<String> for Keys {
    fn from(key: String) -> Self {
        Keys(vec![key])
    }
}

impl From<Vec<String>> for Keys {
    fn from(keys: Vec<String>) -> Self {
        Keys(keys)
    }
}

impl From<Vec<&str>> for Keys {
    fn from(keys: Vec<&str>) -> Self {
        keys.as_slice().into()
    }
}

impl From<&[&str]> for Keys {
    fn from(keys: &[&str]) -> Self {
        Keys(keys.iter().map(|k| k.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Keys {
    fn from(keys: [&str; N]) -> Self {
        keys.as_slice().into()
    }
}

impl From<&[String]> for Keys {
    fn from(keys: &[String]) -> Self {
        Keys(keys.to_vec())
    }
}
