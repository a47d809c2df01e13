//! Top-k selection and routing-weight normalization.

use candle_core::{Tensor, D};

use super::error::{GateError, Result};

/// Get top-k values and their indices over the last dimension.
///
/// Selection is by descending value; ties are broken by the sort and are not
/// guaranteed to be stable.
///
/// # Arguments
/// * `tensor` - Input tensor of shape `[..., N]`
/// * `k` - Number of top values to return (`k <= N`)
///
/// # Returns
/// * `values` - Top-k values of shape `[..., k]`
/// * `indices` - `u32` indices of top-k values of shape `[..., k]`
pub fn top_k_with_indices(tensor: &Tensor, k: usize) -> Result<(Tensor, Tensor)> {
    let dim = tensor.rank() - 1;
    let n = tensor.dim(dim)?;

    if k > n {
        return Err(GateError::InvalidConfiguration(format!(
            "k ({k}) cannot be greater than the number of candidates ({n})"
        )));
    }

    let tensor = tensor.contiguous()?;

    // Sort in descending order and keep the first k
    let sorted_indices = tensor.arg_sort_last_dim(false)?;
    let top_k_indices = sorted_indices.narrow(dim, 0, k)?.contiguous()?;

    let top_k_values = tensor.gather(&top_k_indices, dim)?;

    Ok((top_k_values, top_k_indices))
}

/// Softmax over the selected scores of each token.
///
/// Gates return raw scores; callers that combine expert outputs with
/// normalized weights apply this to the `[num_tokens, top_k]` scores.
pub fn normalized_weights(scores: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::ops::softmax(scores, D::Minus1)?)
}
