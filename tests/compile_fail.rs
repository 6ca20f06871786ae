#[test]
fn frame_ownership_is_enforced_by_the_type_system() {
    let t = trybuild::TestCases::new();
    t.compile_fail("tests/compile_fail/*.rs");
}
