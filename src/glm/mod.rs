//! Negative binomial generalized linear models

mod design;
mod fitting;
pub mod negative_binomial;

pub use design::Design;
pub use fitting::{fit_all_genes, fit_gene, GeneFit, GlmFit, GlmFitParams, DEFAULT_LAMBDA_LOG2};

use crate::data::CountDataSet;
use crate::error::Result;

/// Unpenalised fit of every gene at the dataset's final dispersions,
/// stored as the MLE fit
pub fn fit_dataset(dds: &mut CountDataSet) -> Result<()> {
    let size_factors = dds.require_size_factors()?.clone();
    let dispersions = dds.require_dispersions()?.dispersions.clone();
    let lambda = vec![DEFAULT_LAMBDA_LOG2; dds.design().n_coefs()];
    log::info!("Fitting negative binomial GLMs for {} genes", dds.n_genes());
    let fit = fit_all_genes(
        dds.counts().counts(),
        &size_factors,
        dds.design().matrix(),
        &dispersions,
        &lambda,
        &GlmFitParams::default(),
    )?;
    dds.set_mle_fit(fit);
    Ok(())
}
