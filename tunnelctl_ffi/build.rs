use std::env;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo");
    let bindings = cbindgen::generate(crate_dir).expect("C bindings can be generated");
    bindings.write_to_file("include/tunnelctl.h");
}
