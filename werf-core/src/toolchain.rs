//! Build toolchain service container.
//!
//! Base images give no guarantee of carrying tar or git; stage commands that
//! apply git archives and patches use the binaries from this container,
//! mounted into the build container via volumes-from.

use crate::error::Result;
use crate::runtime::ContainerRuntime;

pub const TOOLCHAIN_VERSION: &str = "0.1.1";

/// Root of the toolchain volume inside containers that mount it.
pub fn toolchain_dir() -> String {
    format!("/.werf/deps/toolchain/{}", TOOLCHAIN_VERSION)
}

/// Path of a toolchain binary inside the build container.
pub fn toolchain_bin(binary: &str) -> String {
    format!("{}/bin/{}", toolchain_dir(), binary)
}

pub fn toolchain_container_name() -> String {
    format!("werfdeps_toolchain_{}", TOOLCHAIN_VERSION)
}

/// Create the toolchain service container unless it already exists and
/// return its name for volumes-from mounting.
pub fn ensure_toolchain_container(runtime: &dyn ContainerRuntime) -> Result<String> {
    let name = toolchain_container_name();
    let image = format!("flant/werf-toolchain:{}", TOOLCHAIN_VERSION);
    runtime.ensure_service_container(&name, &image)?;
    Ok(name)
}
