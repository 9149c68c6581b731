//! Token-to-sentence pooling and normalization

use crate::error::{Error, Result};

/// How token states are reduced to one vector per text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingStrategy {
    /// Attention-mask-weighted mean
    Mean,
    /// Element-wise max over unmasked tokens
    Max,
    /// First token
    Cls,
}

impl PoolingStrategy {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "mean" => Ok(PoolingStrategy::Mean),
            "max" => Ok(PoolingStrategy::Max),
            "cls" => Ok(PoolingStrategy::Cls),
            other => Err(Error::Config(format!(
                "Unknown pooling strategy '{}' (expected mean, max or cls)",
                other
            ))),
        }
    }
}

/// Pool a `[batch, seq_len, hidden]` tensor laid out row-major in `states`
pub fn pool(
    states: &[f32],
    attention_mask: &[i64],
    batch: usize,
    seq_len: usize,
    hidden: usize,
    strategy: PoolingStrategy,
) -> Vec<Vec<f32>> {
    let mut pooled = Vec::with_capacity(batch);

    for i in 0..batch {
        let row = |j: usize| {
            let start = (i * seq_len + j) * hidden;
            &states[start..start + hidden]
        };
        let mask = &attention_mask[i * seq_len..(i + 1) * seq_len];

        let vector = match strategy {
            PoolingStrategy::Cls => row(0).to_vec(),
            PoolingStrategy::Mean => {
                let mut sum = vec![0.0f32; hidden];
                let mut count = 0.0f32;
                for (j, &m) in mask.iter().enumerate() {
                    if m > 0 {
                        let weight = m as f32;
                        for (acc, v) in sum.iter_mut().zip(row(j)) {
                            *acc += v * weight;
                        }
                        count += weight;
                    }
                }
                if count > 0.0 {
                    sum.iter_mut().for_each(|v| *v /= count);
                }
                sum
            }
            PoolingStrategy::Max => {
                let mut max = vec![f32::NEG_INFINITY; hidden];
                let mut seen = false;
                for (j, &m) in mask.iter().enumerate() {
                    if m > 0 {
                        seen = true;
                        for (acc, v) in max.iter_mut().zip(row(j)) {
                            *acc = acc.max(*v);
                        }
                    }
                }
                if !seen {
                    max.iter_mut().for_each(|v| *v = 0.0);
                }
                max
            }
        };

        pooled.push(vector);
    }

    pooled
}

/// Scale a row to unit L2 norm; zero rows are left untouched
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm = if norm == 0.0 { 1.0 } else { norm };
    vector.iter_mut().for_each(|v| *v /= norm);
}

#[cfg(test)]
mod tests {
    use super::*;

    // batch of 1, three tokens, hidden 2; the last token is padding
    const STATES: [f32; 6] = [1.0, 2.0, 3.0, -4.0, 100.0, 100.0];
    const MASK: [i64; 3] = [1, 1, 0];

    #[test]
    fn test_mean_ignores_padding() {
        let pooled = pool(&STATES, &MASK, 1, 3, 2, PoolingStrategy::Mean);
        assert_eq!(pooled, vec![vec![2.0, -1.0]]);
    }

    #[test]
    fn test_max_ignores_padding() {
        let pooled = pool(&STATES, &MASK, 1, 3, 2, PoolingStrategy::Max);
        assert_eq!(pooled, vec![vec![3.0, 2.0]]);
    }

    #[test]
    fn test_cls_takes_first_token() {
        let pooled = pool(&STATES, &MASK, 1, 3, 2, PoolingStrategy::Cls);
        assert_eq!(pooled, vec![vec![1.0, 2.0]]);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!(PoolingStrategy::parse("MEAN").unwrap(), PoolingStrategy::Mean);
        assert_eq!(PoolingStrategy::parse("cls").unwrap(), PoolingStrategy::Cls);
        assert!(PoolingStrategy::parse("last").is_err());
    }
}
