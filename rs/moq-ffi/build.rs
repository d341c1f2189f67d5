use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const LIB_NAME: &str = "moq_ffi";

fn main() {
	let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
	let version = env::var("CARGO_PKG_VERSION").unwrap();
	let target_dir = target_dir();

	println!("cargo:rerun-if-changed=src");
	println!("cargo:rerun-if-changed=cbindgen.toml");
	println!("cargo:rerun-if-changed={LIB_NAME}.pc.in");

	header(&crate_dir, &target_dir.join("include"));
	pkgconfig(&crate_dir, &version, &target_dir.join("pkgconfig"));
}

// target/include/moq_ffi.h
fn header(crate_dir: &str, include_dir: &Path) {
	fs::create_dir_all(include_dir).expect("Failed to create include directory");

	let config = cbindgen::Config::from_root_or_default(crate_dir);
	cbindgen::Builder::new()
		.with_crate(crate_dir)
		.with_config(config)
		.generate()
		.expect("Unable to generate bindings")
		.write_to_file(include_dir.join(format!("{LIB_NAME}.h")));
}

// target/pkgconfig/moq_ffi.pc
fn pkgconfig(crate_dir: &str, version: &str, pkgconfig_dir: &Path) {
	let pc_in = PathBuf::from(crate_dir).join(format!("{LIB_NAME}.pc.in"));
	let Ok(template) = fs::read_to_string(&pc_in) else {
		return;
	};

	let target = env::var("TARGET").unwrap();
	let libs_private = if target.contains("apple") {
		"-framework CoreFoundation -framework Security"
	} else if target.contains("windows") {
		"-lws2_32 -lbcrypt -luserenv -lntdll"
	} else {
		"-ldl -lm -lpthread"
	};

	fs::create_dir_all(pkgconfig_dir).expect("Failed to create pkgconfig directory");
	let content = template
		.replace("@VERSION@", version)
		.replace("@LIBS_PRIVATE@", libs_private);
	fs::write(pkgconfig_dir.join(format!("{LIB_NAME}.pc")), content).expect("Failed to write pkg-config file");
}

fn target_dir() -> PathBuf {
	// OUT_DIR is target/[{target}/]{profile}/build/{crate}-{hash}/out
	PathBuf::from(env::var("OUT_DIR").unwrap())
		.ancestors()
		.nth(4)
		.expect("Failed to get target directory from OUT_DIR")
		.to_path_buf()
}
