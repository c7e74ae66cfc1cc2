use mne_rs::config::MneConfig;
use mne_rs::evoked::Baseline;
use mne_rs::{
    compute_epochs_covariance, find_events, read_events, write_events, ChannelInfo, ChannelKind,
    CovMethod, Epochs, EpochsParams, EventId, FindEventsParams, Info, Raw, Thresholds,
};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SFREQ: f64 = 200.0;
const FIRST_SAMP: i64 = 400;

/// 20 s recording: 4 EEG channels, an EOG, a stim channel. Condition 1 evokes
/// a bump 100 ms after onset on the EEG channels; condition 2 does not.
fn write_sample_raw(dir: &Path) -> PathBuf {
    let mut chs: Vec<ChannelInfo> = (1..=4)
        .map(|i| ChannelInfo::new(format!("EEG 00{}", i), ChannelKind::Eeg))
        .collect();
    chs.push(ChannelInfo::new("EOG 061", ChannelKind::Eog));
    chs.push(ChannelInfo::new("STI 014", ChannelKind::Stim));
    let info = Info::new(SFREQ, chs).unwrap();

    let n_times = (20.0 * SFREQ) as usize;
    let mut rng = StdRng::seed_from_u64(1234);
    let mut data = DMatrix::zeros(6, n_times);
    for c in 0..5 {
        for t in 0..n_times {
            data[(c, t)] = 1e-6 * (rng.random::<f64>() - 0.5);
        }
    }
    for k in 1..20 {
        let onset = k * SFREQ as usize;
        let id = if k % 2 == 1 { 1.0 } else { 2.0 };
        for t in onset..onset + 5 {
            data[(5, t)] = id;
        }
        if id == 1.0 {
            for c in 0..4 {
                for dt in 15..26 {
                    data[(c, onset + dt)] += 10e-6;
                }
            }
        }
    }
    // one blink during the trial at 5 s
    for t in 1010..1030 {
        data[(4, t)] = 300e-6;
    }

    let raw = Raw::from_array(info, data, FIRST_SAMP).unwrap();
    let path = dir.join("sample_audvis_raw.json");
    raw.save(&path).unwrap();
    path
}

fn params() -> EpochsParams {
    let mut params = EpochsParams::new(-0.2, 0.5);
    params.reject = Some(Thresholds::new().with(ChannelKind::Eog, 150e-6));
    params
}

#[test]
fn test_events_from_saved_raw() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample_raw(dir.path());
    let raw = Raw::read(&path, false).unwrap();
    assert!(!raw.is_preloaded());
    assert_eq!(raw.first_samp(), FIRST_SAMP);

    let events = find_events(&raw, &FindEventsParams::default()).unwrap();
    assert_eq!(events.len(), 19);
    assert_eq!(events[0].sample, FIRST_SAMP + 200);
    assert_eq!(events[0].id, 1);
    assert_eq!(events[1].id, 2);

    let eve_path = dir.path().join("sample_audvis-eve.txt");
    write_events(&eve_path, &events).unwrap();
    assert_eq!(read_events(&eve_path).unwrap(), events);
}

#[test]
fn test_lazy_and_preloaded_epochs_match() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample_raw(dir.path());
    let lazy_raw = Arc::new(Raw::read(&path, false).unwrap());
    let loaded_raw = Arc::new(Raw::read(&path, true).unwrap());
    let events = find_events(&lazy_raw, &FindEventsParams::default()).unwrap();

    let mut lazy = Epochs::new(lazy_raw, &events, EventId::single(1), params()).unwrap();
    let mut preload_params = params();
    preload_params.preload = true;
    let mut preloaded = Epochs::new(loaded_raw, &events, EventId::single(1), preload_params).unwrap();

    let a = lazy.get_data().unwrap();
    let b = preloaded.get_data().unwrap();
    assert_eq!(a, b);
    // 10 condition-1 events, the one at 5 s has a blink
    assert_eq!(a.len(), 9);
    assert_eq!(lazy.drop_log(), preloaded.drop_log());
    assert_eq!(lazy.drop_log()[2], vec!["EOG 061".to_string()]);
}

#[test]
fn test_evoked_response_and_noise_covariance() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample_raw(dir.path());
    let raw = Arc::new(Raw::read(&path, true).unwrap());
    let events = find_events(&raw, &FindEventsParams::default()).unwrap();

    let event_id = EventId::from_pairs([("aud", 1), ("vis", 2)]);
    let mut epochs = Epochs::new(raw, &events, event_id, params()).unwrap();
    epochs.equalize_event_counts(&["aud", "vis"]).unwrap();

    let mut aud = epochs.condition("aud").unwrap();
    aud.pick_types(&mne_rs::PickSpec {
        eeg: true,
        ..Default::default()
    })
    .unwrap();
    let evoked = aud.average().unwrap();
    let (ch, time, value) = evoked.peak().unwrap();
    assert!(ch.starts_with("EEG"));
    assert!((0.075..=0.13).contains(&time), "peak at {}", time);
    assert!(value > 5e-6);

    let ave_path = dir.path().join("sample_audvis-ave.json");
    evoked.save(&ave_path).unwrap();
    let back = mne_rs::Evoked::read(&ave_path).unwrap();
    assert_eq!(back.nave, evoked.nave);

    let cov = compute_epochs_covariance(&mut aud, None, Some(0.0), CovMethod::LedoitWolf).unwrap();
    assert_eq!(cov.names.len(), 4);
    let (w, rank) = cov.whitener(1e-10).unwrap();
    assert_eq!(rank, 4);
    let white = &w * &cov.data * w.transpose();
    assert!((white - DMatrix::identity(4, 4)).abs().max() < 1e-6);
}

#[test]
fn test_raw_processing_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample_raw(dir.path());
    let mut raw = Raw::read(&path, false).unwrap();
    assert!(raw.filter(Some(1.0), Some(40.0), None).is_err());

    raw.load_data().unwrap();
    raw.filter(Some(1.0), Some(40.0), None).unwrap();
    raw.decimate(2).unwrap();
    assert_eq!(raw.sfreq(), SFREQ / 2.0);
    assert_eq!(raw.first_samp(), FIRST_SAMP / 2);

    let events = find_events(&raw, &FindEventsParams::default()).unwrap();
    assert_eq!(events.len(), 19);

    let out = dir.path().join("sample_audvis_filt_raw.json");
    raw.save(&out).unwrap();
    let back = Raw::read(&out, false).unwrap();
    assert_eq!(back.n_times(), raw.n_times());
    assert_eq!(back.info().lowpass, raw.info().lowpass);
    assert!(back.info().lowpass <= 40.0);
    assert_eq!(back.info().highpass, 1.0);
}

#[test]
fn test_baseline_window_from_params() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sample_raw(dir.path());
    let raw = Arc::new(Raw::read(&path, false).unwrap());
    let events = find_events(&raw, &FindEventsParams::default()).unwrap();
    let mut params = params();
    params.baseline = Some(Baseline::new(Some(-0.1), Some(0.0)));
    let mut epochs = Epochs::new(raw, &events, EventId::single(2), params).unwrap();
    let data = epochs.get_data().unwrap();
    // -0.1 s is index 20 on the -0.2 .. 0.5 axis, 0.0 s is index 40
    for epoch in &data {
        let mean: f64 = (20..=40).map(|c| epoch[(0, c)]).sum::<f64>() / 21.0;
        assert!(mean.abs() < 1e-15);
    }
}

#[test]
fn test_testing_dataset_raw() {
    let config = MneConfig::load().unwrap();
    let Some(data_path) = config.testing_data_path() else {
        eprintln!("Skipping test: MNE testing dataset not available");
        return;
    };
    let raw_path = data_path.join("MEG/sample/sample_audvis_trunc_raw.json");
    if !raw_path.exists() {
        eprintln!("Skipping test: {:?} not found", raw_path);
        return;
    }
    let raw = Raw::read(&raw_path, false).unwrap();
    let events = find_events(&raw, &FindEventsParams::default()).unwrap();
    assert!(!events.is_empty());
}
