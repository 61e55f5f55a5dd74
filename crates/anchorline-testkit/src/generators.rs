//! Proptest generators for property-based testing.

use proptest::prelude::*;

use anchorline_core::{DataItem, ElementType, Label, ShapeMetadata};

/// Generate a valid label.
pub fn label() -> impl Strategy<Value = Label> {
    "[a-z][a-z0-9-]{0,15}".prop_map(|s| Label::new(s).expect("pattern is non-empty"))
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a microsecond timestamp.
pub fn timestamp() -> impl Strategy<Value = u64> {
    any::<u64>()
}

pub fn element_type() -> impl Strategy<Value = ElementType> {
    prop_oneof![
        Just(ElementType::U8),
        Just(ElementType::U16),
        Just(ElementType::U32),
        Just(ElementType::F32),
        Just(ElementType::F64),
    ]
}

/// Generate shape metadata with one to four small dimensions.
pub fn shape() -> impl Strategy<Value = ShapeMetadata> {
    (prop::collection::vec(1u32..=64, 1..=4), element_type())
        .prop_map(|(dims, element)| ShapeMetadata::new(dims, element))
}

/// Parameters for generating a data item.
#[derive(Debug, Clone)]
pub struct ItemParams {
    pub label: Label,
    pub payload: Vec<u8>,
    pub timestamp: u64,
    pub shape: Option<ShapeMetadata>,
}

impl Arbitrary for ItemParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (label(), payload(512), timestamp(), prop::option::of(shape()))
            .prop_map(|(label, payload, timestamp, shape)| ItemParams {
                label,
                payload,
                timestamp,
                shape,
            })
            .boxed()
    }
}

/// Generate an item from parameters.
pub fn item_from_params(params: &ItemParams) -> DataItem {
    let item = DataItem::new(params.label.clone(), params.payload.clone(), params.timestamp);
    match &params.shape {
        Some(shape) => item.with_shape(shape.clone()),
        None => item,
    }
}

/// A stream of items over a small label alphabet, so labels repeat.
///
/// Timestamps are the stream position, so no two items share an anchor key.
pub fn item_stream(max_len: usize) -> impl Strategy<Value = Vec<DataItem>> {
    let small_label = prop_oneof![Just("apple"), Just("banana"), Just("lemon")]
        .prop_map(|s| Label::new(s).expect("static label"));
    prop::collection::vec((small_label, payload(32)), 1..=max_len).prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (label, payload))| DataItem::new(label, payload, i as u64))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use anchorline::Pipeline;
    use anchorline_core::{decode_item, encode_item, ContentAddress};

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
            .block_on(f)
    }

    proptest! {
        #[test]
        fn test_wire_preserves_item(params: ItemParams) {
            let item = item_from_params(&params);
            let decoded = decode_item(&encode_item(&item)).unwrap();
            prop_assert_eq!(decoded, Some(item));
        }

        #[test]
        fn test_anchor_key_separates_timestamps(params in any::<ItemParams>(), other_ts in timestamp()) {
            prop_assume!(other_ts != params.timestamp);
            let item = item_from_params(&params);
            let address = ContentAddress::of(&item.payload);
            let mut later = item.record(address);
            later.timestamp = other_ts;
            prop_assert_ne!(item.record(address).anchor_key(), later.anchor_key());
        }

        #[test]
        fn test_latest_is_last_ingested(items in item_stream(12)) {
            let latest = block_on(async {
                let pipeline = Pipeline::in_memory();
                for item in &items {
                    pipeline.ingest(item.clone()).await.unwrap();
                }
                let mut latest = HashMap::new();
                for item in &items {
                    let got = pipeline.get_latest(&item.label).await.unwrap();
                    latest.insert(item.label.clone(), got.payload);
                }
                latest
            });

            let mut expected = HashMap::new();
            for item in &items {
                expected.insert(item.label.clone(), item.payload.clone());
            }
            prop_assert_eq!(latest, expected);
        }
    }
}
