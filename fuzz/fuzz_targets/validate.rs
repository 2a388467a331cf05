#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use tollgate::{Config, Validator};

#[derive(Arbitrary, Debug)]
struct Params {
    timeout_secs: u8,
    connections_per_ip: u8,
    bytes_per_connection: u16,
}

#[derive(Arbitrary, Debug)]
enum Operation {
    Packet { advance: u32, record: String },
    Sweep { advance: u32 },
}

fuzz_target!(|input: (Params, Vec<Operation>)| {
    let (params, operations) = input;
    let mut config = Config::default();
    config
        .timeout(Duration::from_secs(params.timeout_secs.into()))
        .connections_per_ip(params.connections_per_ip.into())
        .bytes_per_connection(params.bytes_per_connection.into());
    let validator = Validator::new(config);

    let mut now = 0u64;
    for operation in operations {
        match operation {
            Operation::Packet { advance, record } => {
                now += u64::from(advance);
                validator.handle_packet(now, &record);
                let sender = record.split(':').next().unwrap_or("");
                assert!(
                    validator.open_connections(sender)
                        <= usize::from(params.connections_per_ip)
                );
            }
            Operation::Sweep { advance } => {
                now += u64::from(advance);
                validator.handle_timeouts(now);
            }
        }

        let stats = validator.stats();
        assert_eq!(
            validator.connection_count() as u64,
            stats.opened - stats.closed - stats.expired,
        );
    }
});
