//! POSIX-style path normalization, independent of the host's path rules.

/// Collapse `.` components, apply `..` lexically, drop redundant and
/// trailing slashes. A leading `/` is preserved; an empty relative result
/// becomes `.`.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|&last| last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            _ => parts.push(comp),
        }
    }

    if absolute {
        format!("/{}", parts.join("/"))
    } else if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Split a path into its parent directory and final component.
///
/// The parent is always returned absolute; the root has no parent and
/// yields `None`.
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let norm = normalize(path);
    if norm == "/" {
        return None;
    }

    let parts: Vec<&str> = norm.split('/').filter(|p| !p.is_empty()).collect();
    let (name, ancestors) = parts.split_last()?;

    let parent = if ancestors.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", ancestors.join("/"))
    };

    Some((parent, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("//"), "/");
        assert_eq!(normalize("/app//bin/"), "/app/bin");
        assert_eq!(normalize("/app/./a.txt"), "/app/a.txt");
        assert_eq!(normalize("/app/../etc"), "/etc");
        assert_eq!(normalize("/.."), "/");
        assert_eq!(normalize("/../../x"), "/x");
    }

    #[test]
    fn normalize_relative() {
        assert_eq!(normalize(""), ".");
        assert_eq!(normalize("."), ".");
        assert_eq!(normalize("./"), ".");
        assert_eq!(normalize("a/.."), ".");
        assert_eq!(normalize(".."), "..");
        assert_eq!(normalize("../a"), "../a");
        assert_eq!(normalize("a/b/"), "a/b");
    }

    #[test]
    fn split_parent_basics() {
        assert_eq!(split_parent("/"), None);
        assert_eq!(
            split_parent("/a.txt"),
            Some(("/".to_string(), "a.txt".to_string()))
        );
        assert_eq!(
            split_parent("/app/bin/sh"),
            Some(("/app/bin".to_string(), "sh".to_string()))
        );
        assert_eq!(
            split_parent("/app/sub/.."),
            Some(("/".to_string(), "app".to_string()))
        );
    }
}
