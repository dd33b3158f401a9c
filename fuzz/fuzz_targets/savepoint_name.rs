#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rdb_client::Savepoints;

#[derive(Debug, Arbitrary)]
enum Op {
    Create(String),
    RollbackTo(String),
    Clear,
}

fuzz_target!(|ops: Vec<Op>| {
    let mut savepoints = Savepoints::new();
    for op in ops {
        match op {
            Op::Create(name) => {
                if savepoints.create(&name).is_ok() {
                    assert_eq!(savepoints.names().last(), Some(&name));
                }
            }
            Op::RollbackTo(name) => {
                if savepoints.rolled_back_to(&name).is_ok() {
                    assert_eq!(savepoints.names().last(), Some(&name));
                }
            }
            Op::Clear => savepoints.clear(),
        }
    }
});
