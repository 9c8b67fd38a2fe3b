// End-to-end decoding tests over fixtures built in code
use activity_decoder::{
    ColumnKind, Decoder, DecoderConfig, DecoderError, ErrorKind, Ewa, Field, Format, RecordTime,
    SmoothExt, TimeBasis,
};
use chrono::{Duration, NaiveDate};
use std::io::Write;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_non_decreasing(times: &[RecordTime]) {
    for pair in times.windows(2) {
        assert!(pair[0] <= pair[1], "{} then {}", pair[0], pair[1]);
    }
}

const TCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2">
  <Activities><Activity Sport="Biking"><Id>2015-03-24T15:19:06Z</Id>
    <Lap StartTime="2015-03-24T15:19:06Z"><Track>
      <Trackpoint><Time>2015-03-24T15:19:06Z</Time><AltitudeMeters>530</AltitudeMeters><DistanceMeters>5.611</DistanceMeters></Trackpoint>
      <Trackpoint><Time>2015-03-24T15:19:07Z</Time><AltitudeMeters>530</AltitudeMeters><DistanceMeters>10.999</DistanceMeters></Trackpoint>
      <Trackpoint><Time>2015-03-24T15:19:08.000Z</Time><AltitudeMeters>532</AltitudeMeters><DistanceMeters>25.054</DistanceMeters></Trackpoint>
      <Trackpoint><Time>2015-03-24T15:19:09Z</Time><AltitudeMeters>532</AltitudeMeters><DistanceMeters>42.609</DistanceMeters></Trackpoint>
      <Trackpoint><Time>2015-03-24T15:19:10Z</Time><AltitudeMeters>532</AltitudeMeters><DistanceMeters>59.414</DistanceMeters></Trackpoint>
    </Track></Lap>
  </Activity></Activities>
</TrainingCenterDatabase>"#;

#[test]
fn test_tcx_five_trackpoints() {
    init_logging();
    let table = Decoder::new()
        .decode_reader(Format::Tcx, TCX.as_bytes())
        .unwrap();

    assert_eq!(table.len(), 5);
    assert_non_decreasing(table.timestamps());
    assert_eq!(table.header().basis, TimeBasis::Utc);

    let altitude = table.column("altitude").unwrap();
    assert_eq!(altitude.kind(), ColumnKind::Altitude);
    assert_eq!(altitude.ascent().unwrap(), 2.0);
    assert_eq!(altitude.descent().unwrap(), 0.0);

    let distance = table.column("distance").unwrap();
    let miles = distance.miles().unwrap();
    let last = miles.last().copied().flatten().unwrap();
    assert!((last - 0.0369).abs() < 1e-4, "miles was {}", last);
    assert!((last - 59.414 / 1609.344).abs() < 1e-12);

    assert_eq!(table.elapsed(), Duration::seconds(4));
    assert_eq!(table.recording_time(), Duration::seconds(4));
    assert_eq!(table.laps(), Some(vec![Some(1); 5]));
}

fn srm_fixture(chunks: usize) -> Vec<u8> {
    let mut out = b"SRM7".to_vec();
    out.extend_from_slice(&49_000u16.to_le_bytes()); // days since 1880
    out.extend_from_slice(&2096u16.to_le_bytes()); // wheel circumference
    out.extend([1, 1]); // 1/1 second interval
    out.extend_from_slice(&1u16.to_le_bytes()); // blocks
    out.extend_from_slice(&0u16.to_le_bytes()); // markers beyond the first
    out.push(0);
    out.push(0);
    out.extend([0u8; 70]);

    out.extend([0u8; 255]);
    out.push(1);
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&(chunks as u16).to_le_bytes());
    out.extend([0u8; 10]);

    out.extend_from_slice(&3_600_000u32.to_le_bytes()); // 10:00:00
    out.extend_from_slice(&(chunks as u16).to_le_bytes());

    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(chunks as u16).to_le_bytes());
    out.push(0);

    for i in 0..chunks {
        out.extend_from_slice(&(200u16 + i as u16).to_le_bytes());
        out.extend([90, 140]);
        out.extend_from_slice(&9_000i32.to_le_bytes()); // 32.4 km/h
        out.extend_from_slice(&(100 + i as i32).to_le_bytes());
        out.extend_from_slice(&200i16.to_le_bytes());
    }
    out
}

#[test]
fn test_srm_synthesized_time_index() {
    init_logging();
    let table = Decoder::new()
        .decode_reader(Format::Srm, &srm_fixture(10)[..])
        .unwrap();

    assert_eq!(table.len(), 10);
    let t0 = NaiveDate::from_ymd_opt(1880, 1, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
        + Duration::days(49_000);
    let expected: Vec<RecordTime> = (0..10)
        .map(|s| RecordTime::Naive(t0 + Duration::seconds(s)))
        .collect();
    assert_eq!(table.timestamps(), &expected[..]);
    assert_eq!(table.header().basis, TimeBasis::Floating);

    let speed = table.column("speed").unwrap();
    assert!((speed.mean().unwrap() - 9.0).abs() < 1e-9);
    let kmh = speed.to_unit("km/h").unwrap();
    assert!((kmh[0].unwrap() - 32.4).abs() < 1e-9);

    let distance = table.column("distance").unwrap();
    assert!((distance.last().unwrap() - 90.0).abs() < 1e-9);

    let power = table.column("power").unwrap();
    assert_eq!(power.values()[9], Some(209.0));
    assert_eq!(power.work().unwrap()[1], Some(201.0));
}

fn fit_fixture() -> Vec<u8> {
    let mut body = Vec::new();
    // file_id: manufacturer (uint16)
    body.extend([0x41, 0, 0]);
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend([1, 1, 2, 0x84]);
    body.push(1);
    body.extend_from_slice(&1u16.to_le_bytes());
    // record: timestamp, power, enhanced_altitude, distance
    body.extend([0x40, 0, 0]);
    body.extend_from_slice(&20u16.to_le_bytes());
    body.extend([4, 253, 4, 0x86, 7, 2, 0x84, 78, 4, 0x86, 5, 4, 0x86]);
    for i in 0..6u32 {
        body.push(0);
        body.extend_from_slice(&(1_000_000_000 + i).to_le_bytes());
        body.extend_from_slice(&(150u16 + 10 * i as u16).to_le_bytes());
        body.extend_from_slice(&(2500 + 5 * i).to_le_bytes()); // 0 m, then +1 m each
        body.extend_from_slice(&(i * 500).to_le_bytes()); // 5 m steps
    }

    let mut out = vec![12u8, 0x10];
    out.extend_from_slice(&2100u16.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(b".FIT");
    out.extend(body);
    out.extend([0, 0]);
    out
}

#[test]
fn test_fit_fixture() {
    init_logging();
    let table = Decoder::new()
        .decode_reader(Format::Fit, &fit_fixture()[..])
        .unwrap();

    assert_eq!(table.len(), 6);
    assert_non_decreasing(table.timestamps());
    assert_eq!(table.header().device.manufacturer.as_deref(), Some("garmin"));

    // 1_000_000_000 s after 1989-12-31T00:00:00Z
    let first = table.timestamps()[0].naive_local();
    assert_eq!(first.format("%Y-%m-%dT%H:%M:%S").to_string(), "2021-09-08T01:46:40");

    assert_eq!(table.column("altitude").unwrap().ascent().unwrap(), 5.0);
    assert_eq!(table.column("distance").unwrap().last(), Some(25.0));
    assert_eq!(table.column("lap").unwrap().values()[0], Some(1.0));
    assert_eq!(table.modal_interval(), Some(Duration::seconds(1)));
}

#[test]
fn test_fit_truncated_record_fails_whole_decode() {
    init_logging();
    let mut bytes = fit_fixture();
    let keep = bytes.len() - 8;
    bytes.truncate(keep);
    let err = Decoder::new()
        .decode_reader(Format::Fit, &bytes[..])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Record);
}

const GPX: &str = r#"<?xml version="1.0"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk>
    <trkseg>
      <trkpt lat="46.0000" lon="8.0"><ele>400</ele><time>2019-07-01T06:00:00Z</time></trkpt>
      <trkpt lat="46.0010" lon="8.0"><ele>405</ele><time>2019-07-01T06:00:10Z</time></trkpt>
      <trkpt lat="46.0020" lon="8.0"><ele>403</ele><time>2019-07-01T06:00:20Z</time></trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="46.5000" lon="8.0"><ele>900</ele><time>2019-07-01T08:00:00Z</time></trkpt>
      <trkpt lat="46.5010" lon="8.0"><ele>910</ele><time>2019-07-01T08:00:10Z</time></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

#[test]
fn test_gpx_segments() {
    init_logging();
    let table = Decoder::new()
        .decode_reader(Format::Gpx, GPX.as_bytes())
        .unwrap();

    assert_eq!(table.len(), 5);
    assert_eq!(
        table.laps(),
        Some(vec![Some(1), Some(1), Some(1), Some(2), Some(2)])
    );

    // Three steps of 0.001 degrees of latitude; nothing across the break
    let distance = table.column("distance").unwrap();
    let last = distance.last().unwrap();
    assert!((last - 3.0 * 111.195).abs() < 0.1, "distance was {}", last);

    let altitude = table.column("altitude").unwrap();
    assert_eq!(altitude.ascent().unwrap(), 5.0 + 497.0 + 10.0);
    assert_eq!(altitude.descent().unwrap(), 2.0);

    // The two-hour break is excluded from recording time
    assert_eq!(table.modal_interval(), Some(Duration::seconds(10)));
    assert_eq!(table.recording_time(), Duration::seconds(30));
}

const PWX: &str = r#"<?xml version="1.0"?>
<pwx xmlns="http://www.peaksware.com/PWX/1/0" version="1.0">
  <workout>
    <time>2012-07-14T09:30:00</time>
    <sample><timeoffset>0</timeoffset><pwr>100</pwr><spd>8</spd></sample>
    <sample><timeoffset>1</timeoffset><pwr>300</pwr><spd>9</spd></sample>
    <sample><timeoffset>2</timeoffset><pwr>100</pwr><spd>10</spd></sample>
    <sample><timeoffset>3</timeoffset><pwr>300</pwr><spd>11</spd></sample>
  </workout>
</pwx>"#;

#[test]
fn test_pwx_floating_times_localized() {
    init_logging();
    let config = DecoderConfig::new().with_timezone("America/New_York");
    let table = Decoder::with_config(config)
        .unwrap()
        .decode_reader(Format::Pwx, PWX.as_bytes())
        .unwrap();

    assert_eq!(table.len(), 4);
    let first = table.timestamps()[0];
    assert!(first.is_zoned());
    // Wall-clock time is kept; the zone supplies the offset
    assert_eq!(first.naive_local().format("%H:%M:%S").to_string(), "09:30:00");
    assert!(first.to_string().ends_with("-04:00"));

    let power = table.column("power").unwrap();
    assert_eq!(power.mean(), Some(200.0));
    let smoothed = power.normalized_power().unwrap().unwrap();
    assert!(smoothed > 100.0 && smoothed < 300.0);
    // A single-sample span leaves the series unsmoothed
    let raw = power.normalized_power_with_span(1.0).unwrap().unwrap();
    assert!((raw - 4.1e9f64.powf(0.25)).abs() < 1e-6);
    assert_eq!(table.column("speed").unwrap().max(), Some(11.0));
}

#[test]
fn test_rename_breaks_unit_binding() {
    let mut table = Decoder::new()
        .decode_reader(Format::Tcx, TCX.as_bytes())
        .unwrap();
    table.rename_column("distance", "odometer").unwrap();
    let err = table
        .column("odometer")
        .unwrap()
        .to_unit("miles")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unit);
    assert!(matches!(err, DecoderError::UnitError { .. }));
}

#[test]
fn test_ewa_reusable_outside_columns() {
    let smoothed: Vec<f64> = std::iter::repeat(42.0)
        .take(10)
        .smoothed(Ewa::with_halflife(5.0))
        .collect();
    assert!(smoothed.iter().skip(1).all(|v| (*v - 42.0).abs() < 1e-12));
}

#[test]
fn test_decode_file_dispatch() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();

    let tcx_path = dir.path().join("ride.TCX");
    std::fs::File::create(&tcx_path)
        .unwrap()
        .write_all(TCX.as_bytes())
        .unwrap();
    let srm_path = dir.path().join("ride.srm");
    std::fs::write(&srm_path, srm_fixture(3)).unwrap();

    let decoder = Decoder::new();
    assert_eq!(decoder.decode_file(&tcx_path).unwrap().header().format, Format::Tcx);
    assert_eq!(decoder.decode_file(&srm_path).unwrap().len(), 3);

    let missing = dir.path().join("nothing.gpx");
    assert_eq!(decoder.decode_file(&missing).unwrap_err().kind(), ErrorKind::Io);

    // Right extension, wrong content
    let bogus = dir.path().join("bogus.fit");
    std::fs::write(&bogus, b"definitely not FIT").unwrap();
    assert_eq!(decoder.decode_file(&bogus).unwrap_err().kind(), ErrorKind::Decode);
}

#[test]
fn test_independent_parallel_decodes() {
    let inputs: Vec<(Format, Vec<u8>)> = vec![
        (Format::Tcx, TCX.as_bytes().to_vec()),
        (Format::Srm, srm_fixture(10)),
        (Format::Fit, fit_fixture()),
        (Format::Gpx, GPX.as_bytes().to_vec()),
        (Format::Pwx, PWX.as_bytes().to_vec()),
    ];
    let rows: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = inputs
            .iter()
            .map(|(format, bytes)| {
                scope.spawn(move || {
                    Decoder::new()
                        .decode_reader(*format, &bytes[..])
                        .map(|table| table.len())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect()
    });
    assert_eq!(rows, vec![5, 10, 6, 5, 4]);
}

#[test]
fn test_canonical_stream() {
    let records: Vec<_> = Decoder::new()
        .canonical_records(Format::Tcx, TCX.as_bytes())
        .unwrap()
        .collect::<activity_decoder::Result<_>>()
        .unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[4].get(Field::Distance), Some(59.414));
    assert_eq!(records[0].get(Field::Power), None);
}
