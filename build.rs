fn main() {
    uniffi::generate_scaffolding("src/divelink.udl").unwrap();
}
