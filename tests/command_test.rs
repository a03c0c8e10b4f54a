//! Local engines run as subprocesses, end to end through the synthesizer.
#![cfg(unix)]

use skald::{Skald, SynthesisSettings};

#[tokio::test]
async fn stdin_engine_serves_and_is_cached() {
    let synth = Skald::builder()
        .local_command("cat", "cat", Vec::<String>::new())
        .build()
        .unwrap();
    let settings = SynthesisSettings::default();

    let audio = synth.generate_speech("  Hello  world ", "en", &settings).await.unwrap();
    assert_eq!(audio, b"Hello world");
    assert_eq!(synth.cache_stats().entries, 1);
}

#[tokio::test]
async fn placeholders_reach_the_engine() {
    let synth = Skald::builder()
        .local_command(
            "printf",
            "sh",
            ["-c", "printf '%s' \"$0\"", "{voice}|{speed}|{text}"],
        )
        .build()
        .unwrap();

    let audio = synth
        .generate_speech("Hello", "en-gb", &SynthesisSettings::default().speed(1.5))
        .await
        .unwrap();
    assert_eq!(String::from_utf8(audio).unwrap(), "en-gb|1.50|Hello");
}

#[tokio::test]
async fn text_argument_comes_after_a_separator() {
    let synth = Skald::builder()
        .local_command("args", "sh", ["-c", "printf '%s,' \"$@\"", "sh", "{text}"])
        .build()
        .unwrap();

    let audio = synth
        .generate_speech("--help me", "en", &SynthesisSettings::default())
        .await
        .unwrap();
    assert_eq!(String::from_utf8(audio).unwrap(), "--,--help me,");
    assert_eq!(synth.backend_health()[0].consecutive_failures, 0);
}

#[tokio::test]
async fn crashing_engine_falls_back_to_the_next() {
    let synth = Skald::builder()
        .local_command("broken", "sh", ["-c", "echo oops >&2; exit 1"])
        .local_command("cat", "cat", Vec::<String>::new())
        .build()
        .unwrap();

    let request = skald::SynthesisRequest::new("Hello", "en", SynthesisSettings::default());
    let outcome = synth.synthesize(&request).await;
    assert_eq!(outcome.backend, "cat");
    assert_eq!(outcome.audio, b"Hello");
}

#[tokio::test]
async fn status_probe_finds_engines_on_path() {
    let synth = Skald::builder()
        .local_command("cat", "cat", Vec::<String>::new())
        .local_command("ghost", "definitely-not-a-speech-engine-xyz", ["{text}"])
        .build()
        .unwrap();

    let probes = synth.probe_backends().await;
    let reach: Vec<_> = probes
        .iter()
        .map(|p| (p.backend_id.as_str(), p.reachable))
        .collect();
    assert_eq!(
        reach,
        vec![("cat", true), ("ghost", false), ("silent", true)]
    );
}
