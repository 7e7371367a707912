pub mod fetch;
pub mod key;
pub mod swap;

/// Get version string with build details
pub fn version(name: &str) -> String {
    let build_type = if cfg!(debug_assertions) { "debug" } else { "release" };
    let link_mode = if cfg!(target_feature = "crt-static") { "static" } else { "dynamic" };

    format!("{} {} {} {} {} {}",
        name,
        env!("CARGO_PKG_VERSION"),
        std::env::consts::ARCH,
        std::env::consts::OS,
        link_mode,
        build_type,
    )
}
