//! Cast dispatch properties: every table entry matches a direct computation.

use egd_common::cast::get_cast_fn;
use egd_common::types::{DataType, Scale};
use proptest::prelude::*;

fn encode(dtype: DataType, v: f64) -> Vec<u8> {
    match dtype {
        DataType::Int32 => (v as i32).to_ne_bytes().to_vec(),
        DataType::Float => (v as f32).to_ne_bytes().to_vec(),
        DataType::Double => v.to_ne_bytes().to_vec(),
    }
}

/// Native value as the cast sees it.
fn native(dtype: DataType, v: f64) -> f64 {
    match dtype {
        DataType::Int32 => f64::from(v as i32),
        DataType::Float => f64::from(v as f32),
        DataType::Double => v,
    }
}

fn expected(out: DataType, v: f64, scale: Option<Scale>) -> Vec<u8> {
    match out {
        DataType::Int32 => {
            let x = v as i32;
            let x = match scale {
                Some(s) => (f64::from(x) * s.multiplier + s.offset) as i32,
                None => x,
            };
            x.to_ne_bytes().to_vec()
        }
        DataType::Float => {
            let x = v as f32;
            let x = match scale {
                Some(s) => x * s.multiplier as f32 + s.offset as f32,
                None => x,
            };
            x.to_ne_bytes().to_vec()
        }
        DataType::Double => {
            let x = match scale {
                Some(s) => v * s.multiplier + s.offset,
                None => v,
            };
            x.to_ne_bytes().to_vec()
        }
    }
}

proptest! {
    #[test]
    fn all_triples_match_direct_computation(
        raw in -8_388_608.0f64..8_388_607.0,
        multiplier in -4.0f64..4.0,
        offset in -1000.0f64..1000.0,
    ) {
        let scale = Scale { offset, multiplier };
        for in_type in DataType::ALL {
            let input = encode(in_type, raw);
            let value = native(in_type, raw);
            for out_type in DataType::ALL {
                for scaled in [false, true] {
                    let cast = get_cast_fn(in_type, out_type, scaled);
                    let mut out = vec![0u8; out_type.size()];
                    cast(&mut out, &input, &scale);
                    let want = expected(out_type, value, scaled.then_some(scale));
                    prop_assert_eq!(
                        &out, &want,
                        "{:?} -> {:?} scaled={}", in_type, out_type, scaled
                    );
                }
            }
        }
    }
}
