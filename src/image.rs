//! Registry-prefix normalization for image references.
//!
//! Docker reports images from the default registry without a registry
//! (`nginx:latest`), while image lists name them fully
//! (`docker.io/library/nginx:latest`). Both sides of any comparison must go
//! through the same function here, or membership checks silently fail.

/// The registry assumed for references without an explicit registry host.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// The implicit organization for single-segment default-registry images.
const LIBRARY_NAMESPACE: &str = "library";

/// Qualifies an image reference with the default registry.
///
/// A first path segment containing a dot is treated as a registry host and
/// left untouched. Otherwise `docker.io/` is prepended, plus `library/` when
/// the name has no organization segment. Applying it twice is a no-op.
///
/// ```
/// use kuberuntime::image::add_docker_io;
///
/// assert_eq!(add_docker_io("nginx"), "docker.io/library/nginx");
/// assert_eq!(add_docker_io("myuser/app"), "docker.io/myuser/app");
/// assert_eq!(add_docker_io("myregistry.io/app"), "myregistry.io/app");
/// ```
pub fn add_docker_io(name: &str) -> String {
    if let Some((first, _)) = name.split_once('/')
        && first.contains('.')
    {
        return name.to_string();
    }
    match name.split_once('/') {
        Some((user, image)) => format!("{}/{}/{}", DEFAULT_REGISTRY, user, image),
        None => format!("{}/{}/{}", DEFAULT_REGISTRY, LIBRARY_NAMESPACE, name),
    }
}

/// Strips the implicit default-registry prefix from an image reference.
///
/// Inverse of [`add_docker_io`] for default-registry images:
/// `docker.io/library/nginx:1.25` and `nginx:1.25` both become `nginx:1.25`.
pub fn trim_docker_io(name: &str) -> &str {
    let name = name.strip_prefix("docker.io/").unwrap_or(name);
    match name.strip_prefix("library/") {
        Some(rest) if !rest.contains('/') => rest,
        _ => name,
    }
}
