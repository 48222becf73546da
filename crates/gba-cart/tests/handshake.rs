//! Mailbox ownership rules under arbitrary interleavings of host and
//! console actions.

use gba_cart::{BackingImage, BusAddr, ConsoleMailbox, HandshakeError, HostMailbox};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Action {
    PublishFramebuffer(u32),
    TakeFramebuffer,
    FillSlot(usize, u32),
    ConsumeSlot(usize),
    SetVblank,
    TakeVblank,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u32..4).prop_map(|a| Action::PublishFramebuffer(a * 0x100)),
        Just(Action::TakeFramebuffer),
        (0usize..3, 0u32..4).prop_map(|(s, a)| Action::FillSlot(s, a * 0x40)),
        (0usize..3).prop_map(Action::ConsumeSlot),
        Just(Action::SetVblank),
        Just(Action::TakeVblank),
    ]
}

/// What each field should hold.
#[derive(Debug, Default)]
struct Model {
    framebuffer: u32,
    slots: [u32; 2],
    vblank: bool,
}

proptest! {
    #[test]
    fn every_handover_alternates(actions in prop::collection::vec(action(), 1..64)) {
        let mut image = BackingImage::new(0x1000).expect("valid capacity");
        let mut model = Model::default();

        for action in actions {
            match action {
                Action::PublishFramebuffer(addr) => {
                    let result = HostMailbox::new(&mut image).publish_framebuffer(BusAddr(addr));
                    let expected = if addr == 0 {
                        Err(HandshakeError::NullAddress)
                    } else if model.framebuffer != 0 {
                        Err(HandshakeError::FramebufferPending)
                    } else {
                        model.framebuffer = addr;
                        Ok(())
                    };
                    prop_assert_eq!(result, expected);
                }
                Action::TakeFramebuffer => {
                    let result = ConsoleMailbox::new(&mut image).take_framebuffer();
                    let expected = if model.framebuffer == 0 {
                        Err(HandshakeError::NoFramebuffer)
                    } else {
                        model.framebuffer = 0;
                        Ok(())
                    };
                    prop_assert_eq!(result, expected);
                }
                Action::FillSlot(slot, addr) => {
                    let result = HostMailbox::new(&mut image).fill_audio_slot(slot, BusAddr(addr));
                    let expected = match model.slots.get_mut(slot) {
                        None => Err(HandshakeError::NoSuchSlot(slot)),
                        Some(_) if addr == 0 => Err(HandshakeError::NullAddress),
                        Some(held) if *held != 0 => Err(HandshakeError::SlotFull(slot)),
                        Some(held) => {
                            *held = addr;
                            Ok(())
                        }
                    };
                    prop_assert_eq!(result, expected);
                }
                Action::ConsumeSlot(slot) => {
                    let result = ConsoleMailbox::new(&mut image).consume_audio_slot(slot);
                    let expected = match model.slots.get_mut(slot) {
                        None => Err(HandshakeError::NoSuchSlot(slot)),
                        Some(held) if *held == 0 => Err(HandshakeError::SlotEmpty(slot)),
                        Some(held) => Ok(BusAddr(std::mem::take(held))),
                    };
                    prop_assert_eq!(result, expected);
                }
                Action::SetVblank => {
                    ConsoleMailbox::new(&mut image).set_vblank();
                    model.vblank = true;
                }
                Action::TakeVblank => {
                    let taken = HostMailbox::new(&mut image).take_vblank();
                    prop_assert_eq!(taken, std::mem::take(&mut model.vblank));
                }
            }

            let snapshot = HostMailbox::new(&mut image).snapshot();
            prop_assert_eq!(snapshot.fb_addr, model.framebuffer);
            prop_assert_eq!(snapshot.audio_addr, model.slots);
            prop_assert_eq!(snapshot.vblank_flag != 0, model.vblank);
        }
    }
}

#[test]
fn host_refuses_to_overwrite_an_unconsumed_framebuffer() {
    let mut image = BackingImage::new(0x1000).expect("valid capacity");
    let mut host = HostMailbox::new(&mut image);
    host.publish_framebuffer(BusAddr(0x0800_0400))
        .expect("field starts empty");
    assert_eq!(
        host.publish_framebuffer(BusAddr(0x0800_0800)),
        Err(HandshakeError::FramebufferPending)
    );
    assert_eq!(host.snapshot().fb_addr, 0x0800_0400);
}
