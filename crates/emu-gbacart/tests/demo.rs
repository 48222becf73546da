//! The demo firmware end to end: console, cartridge and host together.

use emu_gbacart::{RunConfig, capture, demo};
use gba_cart::Button;
use gba_console::ConsoleConfig;

fn config() -> RunConfig {
    RunConfig {
        display_height: 4,
        console: ConsoleConfig::with_frame_ticks(60_000),
        ..RunConfig::default()
    }
}

#[test]
fn crosshair_follows_the_dpad() {
    let mut machine = config().build().expect("valid config");
    machine.press(Button::Right);
    machine.run_frames(4);

    let host = machine.slot().app();
    assert_eq!(host.vblanks(), 4);
    assert_eq!(host.cursor(), (124, 2));

    // Frame 4 shows what was painted after the third vblank.
    let screen = machine.screen();
    assert_eq!(screen.frames(), 4);
    assert_eq!(screen.pixel(123, 0), 0x7FFF);
    assert_eq!(screen.pixel(120, 0), 0x2800);
    assert_eq!(screen.pixel(123, 4), 0);
    assert_eq!(machine.slot().cart().full_resets(), 0);
}

#[test]
fn tone_reaches_the_speaker() {
    let mut machine = config().build().expect("valid config");
    machine.run_frames(6);
    let samples = machine.take_samples();
    assert!(samples.len() >= 16, "{}", samples.len());
    let tone = demo::tone();
    for (i, &sample) in samples.iter().enumerate() {
        assert_eq!(sample, tone[i % tone.len()] as i8, "sample {i}");
    }
    assert_eq!(machine.audio().starved(), 0);
}

#[test]
fn captures_are_written() {
    let mut machine = config().build().expect("valid config");
    machine.run_frames(6);

    let dir = std::env::temp_dir().join(format!("emu-gbacart-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let png = dir.join("screen.png");
    let wav = dir.join("sound.wav");
    capture::save_screenshot(machine.screen(), &png).expect("png written");
    capture::save_audio(&machine.take_samples(), demo::SAMPLE_RATE, &wav).expect("wav written");

    assert!(std::fs::metadata(&png).expect("png exists").len() > 8);
    let reader = hound::WavReader::open(&wav).expect("valid wav");
    assert_eq!(reader.spec().sample_rate, demo::SAMPLE_RATE);
    assert!(reader.len() >= 16);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn console_sees_the_demo_header() {
    let machine = config().build().expect("valid config");
    let header = machine.header().expect("booted");
    assert_eq!(header.title, demo::TITLE);
    assert!(header.valid);
}
