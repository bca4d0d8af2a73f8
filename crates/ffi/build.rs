use std::env;
use std::path::PathBuf;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let output_file = PathBuf::from(&crate_dir)
        .join("../../NebulaSimFFI.h")
        .display()
        .to_string();

    // C header for engine integrations
    cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("NEBULA_SIM_FFI_H")
        .with_documentation(true)
        .with_pragma_once(false)
        .generate()
        .expect("Unable to generate C bindings")
        .write_to_file(output_file);

    for source in ["lib.rs", "error.rs", "instance.rs", "simulation.rs"] {
        println!("cargo:rerun-if-changed=src/{source}");
    }
}
