use super::SEPARATOR;

/// A node in the topic naming hierarchy, e.g. `robot.state`.
///
/// Categories only build names; they are not registered anywhere themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Category {
    path: Vec<String>,
}

impl Category {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            path: vec![name.into()],
        }
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(name.into());
        Self { path }
    }

    /// Full dotted name of this category.
    pub fn name(&self) -> String {
        self.path.join(&SEPARATOR.to_string())
    }

    /// Name of the topic `leaf` placed directly under this category.
    pub fn topic_name(&self, leaf: &str) -> String {
        format!("{}{SEPARATOR}{leaf}", self.name())
    }

    pub fn segments(&self) -> &[String] {
        &self.path
    }
}
