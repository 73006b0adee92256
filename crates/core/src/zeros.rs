/// Zero-hash cache: `z[0] = 0`, `z[i] = h2(z[i-1], z[i-1])`, memoized per
/// depth for the process lifetime. Used as the default value for absent
/// leaves and nodes.
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::error::Result;
use crate::fe::Fr;
use crate::poseidon::h2;

fn cache() -> &'static Mutex<HashMap<u8, Vec<Fr>>> {
    static CACHE: OnceLock<Mutex<HashMap<u8, Vec<Fr>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns `[z[0], ..., z[depth]]`.
pub fn zeros(depth: u8) -> Result<Vec<Fr>> {
    {
        let guard = cache().lock().expect("zero-hash cache poisoned");
        if let Some(z) = guard.get(&depth) {
            return Ok(z.clone());
        }
    }

    let mut z = Vec::with_capacity(depth as usize + 1);
    z.push(Fr::from(0u64));
    for i in 1..=depth as usize {
        z.push(h2(z[i - 1], z[i - 1])?);
    }

    let mut guard = cache().lock().expect("zero-hash cache poisoned");
    guard.insert(depth, z.clone());
    Ok(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_of_zero_is_zero() {
        let z = zeros(5).unwrap();
        assert_eq!(z[0], Fr::from(0u64));
    }

    #[test]
    fn memoized_result_is_stable() {
        let a = zeros(10).unwrap();
        let b = zeros(10).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn deeper_depth_extends_shallower_prefix() {
        let shallow = zeros(4).unwrap();
        let deep = zeros(8).unwrap();
        assert_eq!(&deep[..5], &shallow[..]);
    }
}
