#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use snapline_core::config::{table, ConfigValue};
use snapline_core::content_type::{self, marshal_metrics, swap_content_type, unmarshal_metrics};
use snapline_core::crypto::{generate_key, Encrypter};
use snapline_core::encoding::Encoder;
use snapline_core::metric::{Metric, MetricData, Namespace};

fn every_variant() -> Vec<MetricData> {
    vec![
        MetricData::String("up".into()),
        MetricData::Float32(1.5),
        MetricData::Float64(-2.25),
        MetricData::Int32(-7),
        MetricData::Int64(1 << 40),
        MetricData::Uint32(7),
        MetricData::Uint64(u64::MAX),
        MetricData::Bytes(vec![0, 1, 255]),
        MetricData::Bool(true),
        MetricData::Null,
    ]
}

fn sample(data: MetricData) -> Metric {
    Metric::new(
        Namespace::new(&["intel", "mock"]).add_dynamic("host", "host id"),
        data,
    )
    .with_version(2)
    .with_timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
    .with_tag("dc", "east")
    .with_config(table([("user", ConfigValue::Str("root".into()))]))
}

#[test]
fn every_variant_survives_every_codec() {
    let key = generate_key();
    let encoders = [
        Encoder::binary(),
        Encoder::json(),
        Encoder::binary().with_encrypter(Arc::new(Encrypter::with_key(key.clone()))),
        Encoder::json().with_encrypter(Arc::new(Encrypter::with_key(key))),
    ];
    for enc in &encoders {
        for data in every_variant() {
            let m = sample(data);
            let bytes = enc.encode(&m).unwrap();
            let back: Metric = enc.decode(&bytes).unwrap();
            assert_eq!(back, m);
        }
    }
}

#[test]
fn encrypted_payload_is_opaque_without_key() {
    let sealed = Encoder::binary().with_encrypter(Arc::new(Encrypter::with_key(generate_key())));
    let bytes = sealed.encode(&sample(MetricData::Int64(1))).unwrap();
    let err = Encoder::binary().decode::<Metric>(&bytes);
    assert!(err.is_err());
}

#[test]
fn content_type_families_decode_to_same_metrics() {
    let metrics: Vec<Metric> = every_variant().into_iter().map(sample).collect();
    for ct in [content_type::ANY, content_type::BINARY, content_type::JSON] {
        let (bytes, actual) = marshal_metrics(ct, &metrics).unwrap();
        if ct == content_type::ANY {
            assert_eq!(actual, content_type::BINARY);
        } else {
            assert_eq!(actual, ct);
        }
        assert_eq!(unmarshal_metrics(&actual, &bytes).unwrap(), metrics);
    }
}

#[test]
fn swap_there_and_back_preserves_value() {
    let metrics = vec![sample(MetricData::Float64(3.5)), sample(MetricData::Null)];
    let (bin, _) = marshal_metrics(content_type::BINARY, &metrics).unwrap();

    let (json, json_ct) = swap_content_type(content_type::BINARY, content_type::JSON, &bin).unwrap();
    assert_eq!(json_ct, content_type::JSON);
    let (bin2, _) = swap_content_type(content_type::JSON, content_type::BINARY, &json).unwrap();

    assert_eq!(unmarshal_metrics(content_type::BINARY, &bin2).unwrap(), metrics);
}

#[test]
fn empty_and_unknown_content_types_rejected() {
    let err = marshal_metrics(content_type::BINARY, &[]).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONTENT_TYPE");

    let err = marshal_metrics("other.xml", &[sample(MetricData::Null)]).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONTENT_TYPE");

    let err = unmarshal_metrics(content_type::JSON, b"{not json").expect_err("must fail");
    assert_eq!(err.code().as_str(), "DECODE");
}
