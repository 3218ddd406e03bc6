#[cfg(feature = "verbs")]
use std::{env, path::Path};

/// Build flow with the `verbs` feature:
///
/// 1. Find `libibverbs` through `pkg-config` and link to it.
/// 2. Generate bindings of the verbs used by the provider.
#[cfg(feature = "verbs")]
fn main() {
    // Refuse to compile on non-64-bit platforms.
    if cfg!(not(target_pointer_width = "64")) {
        panic!("the `verbs` provider only supports 64-bit platforms");
    }

    let lib = pkg_config::Config::new()
        .atleast_version("1.8.28")
        .statik(false)
        .probe("libibverbs")
        .expect("libibverbs not found, install rdma-core or MLNX_OFED v5+");

    println!("cargo:rerun-if-changed=src/bindings/verbs.h");
    gen_verb_bindings(lib.include_paths.iter().map(|p| p.display().to_string()));
}

#[cfg(not(feature = "verbs"))]
fn main() {}

#[cfg(feature = "verbs")]
fn gen_verb_bindings(include_dirs: impl Iterator<Item = String>) {
    let include_args = include_dirs.map(|p| format!("-I{}", p));
    let bindings = bindgen::builder()
        .clang_args(include_args)
        .header("src/bindings/verbs.h")
        .allowlist_function("ibv_.*")
        .allowlist_type("ibv_.*")
        .opaque_type("pthread_.*")
        .blocklist_type("in6_addr")
        .blocklist_type("sockaddr.*")
        .blocklist_type("timespec")
        .bitfield_enum("ibv_access_flags")
        .bitfield_enum("ibv_qp_attr_mask")
        .bitfield_enum("ibv_send_flags")
        .bitfield_enum("ibv_wc_flags")
        .constified_enum_module("ibv_mtu")
        .constified_enum_module("ibv_port_state")
        .constified_enum_module("ibv_wc_status")
        .constified_enum_module("ibv_wc_opcode")
        .constified_enum_module("ibv_qp_type")
        .constified_enum_module("ibv_qp_state")
        .constified_enum_module("ibv_wr_opcode")
        .derive_copy(true)
        .derive_debug(false)
        .derive_default(true)
        .generate_comments(false)
        .layout_tests(false)
        .prepend_enum_name(false)
        .size_t_is_usize(true)
        .generate()
        .expect("failed to generate bindings");

    let out_dir = env::var_os("OUT_DIR").expect("OUT_DIR not set");
    let dest = Path::new(&out_dir).join("verbs_bindings.rs");
    bindings
        .write_to_file(dest)
        .expect("failed to write bindings");
}
