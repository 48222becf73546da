//! Bus transactions against the full cartridge pipeline.

use gba_cart::{CartConfig, Cartridge, READ_CH};
use gba_console::{CartBus, ConsoleConfig};
use proptest::prelude::*;

const PROGRAM_LEN: usize = 0x2000;

/// Every halfword holds its own offset, scrambled a little.
fn pattern(offset: u32) -> u16 {
    ((offset >> 1) as u16).wrapping_mul(0x9E37) ^ 0x5A5A
}

fn program() -> Vec<u8> {
    (0..PROGRAM_LEN as u32 / 2)
        .flat_map(|i| pattern(i * 2).to_le_bytes())
        .collect()
}

fn bus() -> CartBus<Cartridge> {
    let mut cart = Cartridge::new(CartConfig::with_program(program())).expect("valid config");
    cart.start(true);
    let mut bus = CartBus::new(cart, ConsoleConfig::default());
    bus.idle(16);
    bus
}

#[test]
fn first_read_after_power_up() {
    let mut bus = bus();
    assert_eq!(bus.read_u16(0x100), pattern(0x100));
    assert_eq!(bus.slot().full_resets(), 0);
}

#[test]
fn sequential_burst_follows_the_image() {
    let mut bus = bus();
    let mut words = [0; 16];
    bus.read_burst(0x400, &mut words);
    for (i, &word) in words.iter().enumerate() {
        assert_eq!(word, pattern(0x400 + 2 * i as u32), "word {i}");
    }
}

#[test]
fn prefetched_data_never_leaks_into_the_next_read() {
    let mut bus = bus();
    for offset in [0x10, 0x800, 0x12, 0x1FFE, 0x0] {
        assert_eq!(bus.read_u16(offset), pattern(offset), "offset {offset:#x}");
    }
    let cart = bus.slot();
    assert_eq!(cart.full_resets(), 0);
    assert_eq!(cart.underruns(), 0);
    // Every read ends with data still queued, so each is recovered locally,
    // but none of them was a bad read.
    assert_eq!(cart.local_faults(), 5);
    assert!(!cart.dma().channel(READ_CH).read_error());
}

#[test]
fn writes_land_at_the_latched_offset() {
    let mut bus = bus();
    bus.write_burst(0x1000, &[0x1111, 0x2222, 0x3333]);
    let image = bus.slot().image();
    assert_eq!(image.read_u16(0x1000), Some(0x1111));
    assert_eq!(image.read_u16(0x1002), Some(0x2222));
    assert_eq!(image.read_u16(0x1004), Some(0x3333));
    assert_eq!(image.read_u16(0x1006), Some(pattern(0x1006)));

    let mut back = [0; 3];
    bus.read_burst(0x1000, &mut back);
    assert_eq!(back, [0x1111, 0x2222, 0x3333]);
}

#[test]
fn read_outside_the_image_underruns_then_recovers() {
    let mut bus = bus();
    // Past the configured capacity: the read channel faults on its first
    // fetch and the read-drive program starves.
    let floating = bus.read_u16(0x7F_0000);
    assert_eq!(floating, 0xFFFF);
    assert!(bus.slot().underruns() >= 1);
    assert!(bus.slot().dma().channel(READ_CH).read_error());

    assert_eq!(bus.read_u16(0x20), pattern(0x20));
    assert!(!bus.slot().dma().channel(READ_CH).read_error());
    assert_eq!(bus.slot().full_resets(), 0);
}

#[test]
fn accumulator_is_reseeded_after_every_transaction() {
    let mut bus = bus();
    for offset in (0..0x40).step_by(2) {
        bus.read_u16(offset * 0x40);
        assert_eq!(bus.slot().resolver().resolve(), gba_cart::IMAGE_BASE);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_read_sequence_resolves(
        reads in prop::collection::vec((0u32..PROGRAM_LEN as u32 / 2 - 8, 1usize..6), 1..6)
    ) {
        let mut bus = bus();
        for (halfword, len) in reads {
            let offset = halfword * 2;
            let mut words = vec![0; len];
            bus.read_burst(offset, &mut words);
            for (i, &word) in words.iter().enumerate() {
                prop_assert_eq!(word, pattern(offset + 2 * i as u32));
            }
        }
        prop_assert_eq!(bus.slot().full_resets(), 0);
    }
}
