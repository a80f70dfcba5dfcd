fn main() {
    // ── macOS: CoreBluetooth refuses to scan without an embedded Info.plist ──
    //
    // A plain CLI binary has no app bundle, so the plist carrying
    // NSBluetoothAlwaysUsageDescription is linked into the
    // __TEXT,__info_plist section of the Mach-O image instead.
    //
    // `CARGO_CFG_TARGET_OS` is the target OS, so cross builds pick this up too.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        let dir = std::env::var("CARGO_MANIFEST_DIR")
            .expect("CARGO_MANIFEST_DIR must be set by Cargo");

        let plist = format!("{dir}/Info.plist");

        // ld … -sectcreate __TEXT __info_plist <plist>
        for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
            println!("cargo:rustc-link-arg={arg}");
        }

        println!("cargo:rerun-if-changed=Info.plist");
    }
}
