fn main() {
    // `#[sqlx::test]` embeds the migrations at compile time
    println!("cargo:rerun-if-changed=migrations");
}
