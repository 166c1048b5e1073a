//! `capsa` — build and open secure content-delivery envelopes from the
//! command line. A thin, synchronous wrapper over `capsa-core`, kept
//! around as a worked usage example and a manual testing harness; it is
//! not meant to replace a host SDK's own integration of the core.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use humansize::{format_size, BINARY};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};

use capsa_core::{
    build, fingerprint_pem, generate_keypair, verify_and_unwrap, BuildInputs, DecryptInputs,
    FileInput, InMemoryDirectory, Limits, PartyKey, PayloadInput,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "capsa: build and open secure content-delivery envelopes")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate an RSA keypair for use as a party's identity.
    Keygen {
        /// Directory to write `party.pub.pem` and `party.priv.pem` into.
        #[arg(long, default_value = ".")]
        outdir: PathBuf,
        /// RSA modulus size in bits.
        #[arg(long, default_value_t = 4096)]
        bits: usize,
    },
    /// Print the fingerprint of a public key PEM file.
    Fingerprint {
        /// Path to a public key PEM file.
        pubkey: PathBuf,
    },
    /// Build a capsa from a subject/body and zero or more files.
    Build {
        /// Party id of the creator.
        #[arg(long)]
        creator: String,
        /// Path to the creator's private key PEM.
        #[arg(long)]
        creator_key: PathBuf,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        body: Option<String>,
        /// File paths to attach, encrypted under the same content key.
        #[arg(long = "file", num_args = 0..)]
        files: Vec<PathBuf>,
        /// Recipient party id, repeatable; requires a matching `--recipient-key`.
        #[arg(long = "recipient", num_args = 0..)]
        recipients: Vec<String>,
        /// Recipient public key PEM, one per `--recipient`, same order.
        #[arg(long = "recipient-key", num_args = 0..)]
        recipient_keys: Vec<PathBuf>,
        /// Where to write the capsa JSON record.
        #[arg(long)]
        output: PathBuf,
        /// Directory to write each file's ciphertext into, named by file id.
        #[arg(long)]
        payload_dir: PathBuf,
    },
    /// Verify and decrypt a capsa built by this tool.
    Open {
        /// Path to the capsa JSON record.
        input: PathBuf,
        /// Party id opening the capsa.
        #[arg(long)]
        party: String,
        /// Path to that party's private key PEM.
        #[arg(long)]
        party_key: PathBuf,
        /// Path to the creator's public key PEM, for signature verification.
        #[arg(long)]
        creator_key: PathBuf,
        /// Directory holding each file's ciphertext, named by file id.
        #[arg(long)]
        payload_dir: PathBuf,
        /// Directory to write decrypted files into.
        #[arg(long)]
        out_dir: PathBuf,
        /// Skip signature verification. Only for local debugging.
        #[arg(long)]
        insecure_skip_verify: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Keygen { outdir, bits } => cmd_keygen(&outdir, bits),
        Cmd::Fingerprint { pubkey } => cmd_fingerprint(&pubkey),
        Cmd::Build {
            creator,
            creator_key,
            subject,
            body,
            files,
            recipients,
            recipient_keys,
            output,
            payload_dir,
        } => cmd_build(
            creator,
            &creator_key,
            subject,
            body,
            files,
            recipients,
            recipient_keys,
            &output,
            &payload_dir,
        ),
        Cmd::Open {
            input,
            party,
            party_key,
            creator_key,
            payload_dir,
            out_dir,
            insecure_skip_verify,
        } => cmd_open(
            &input,
            party,
            &party_key,
            &creator_key,
            &payload_dir,
            &out_dir,
            insecure_skip_verify,
        ),
    }
}

fn cmd_keygen(outdir: &PathBuf, bits: usize) -> Result<()> {
    fs::create_dir_all(outdir).with_context(|| format!("creating {}", outdir.display()))?;
    let (pub_pem, priv_pem, fp) = generate_keypair(bits).context("generating RSA keypair")?;

    let pub_path = outdir.join("party.pub.pem");
    let priv_path = outdir.join("party.priv.pem");
    fs::write(&pub_path, &pub_pem).with_context(|| format!("writing {}", pub_path.display()))?;
    fs::write(&priv_path, &priv_pem).with_context(|| format!("writing {}", priv_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&priv_path, fs::Permissions::from_mode(0o600))?;
    }

    println!("wrote public key:  {}", pub_path.display());
    println!("wrote private key: {}", priv_path.display());
    println!("fingerprint: {fp}");
    Ok(())
}

fn cmd_fingerprint(pubkey: &PathBuf) -> Result<()> {
    let pem = fs::read_to_string(pubkey).with_context(|| format!("reading {}", pubkey.display()))?;
    let fp = fingerprint_pem(&pem).context("computing fingerprint")?;
    println!("{fp}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_build(
    creator: String,
    creator_key: &PathBuf,
    subject: Option<String>,
    body: Option<String>,
    file_paths: Vec<PathBuf>,
    recipients: Vec<String>,
    recipient_key_paths: Vec<PathBuf>,
    output: &PathBuf,
    payload_dir: &PathBuf,
) -> Result<()> {
    if recipients.len() != recipient_key_paths.len() {
        bail!(
            "{} recipients given but {} recipient keys given; these must be in matching order",
            recipients.len(),
            recipient_key_paths.len()
        );
    }

    let creator_priv_pem =
        fs::read_to_string(creator_key).with_context(|| format!("reading {}", creator_key.display()))?;
    let creator_private_key =
        RsaPrivateKey::from_pkcs8_pem(&creator_priv_pem).context("parsing creator private key")?;

    let mut directory = InMemoryDirectory::new();
    for (party_id, key_path) in recipients.iter().zip(recipient_key_paths.iter()) {
        let pem = fs::read_to_string(key_path).with_context(|| format!("reading {}", key_path.display()))?;
        let fp = fingerprint_pem(&pem).context("computing recipient fingerprint")?;
        directory.insert(PartyKey {
            party_id: party_id.clone(),
            public_key_pem: pem,
            fingerprint: fp,
            acting_for: Vec::new(),
        });
    }

    let mut files = Vec::with_capacity(file_paths.len());
    for path in &file_paths {
        let plaintext = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let mimetype = mime_guess_from_extension(path);
        files.push(FileInput {
            filename,
            mimetype,
            plaintext,
        });
    }

    let payload = PayloadInput {
        subject,
        body,
        files,
        ..Default::default()
    };

    let built = build(BuildInputs {
        creator_party_id: creator.clone(),
        creator_private_key: &creator_private_key,
        payload,
        recipients,
        directory: &directory,
        limits: Limits::default(),
        key_cache: None,
        cancellation: None,
    })
    .context("building capsa")?;

    fs::create_dir_all(payload_dir).with_context(|| format!("creating {}", payload_dir.display()))?;
    let total_bytes: u64 = built.file_payloads.iter().map(|(_, ct)| ct.len() as u64).sum();
    for (file_id, ciphertext) in &built.file_payloads {
        let path = payload_dir.join(file_id);
        fs::write(&path, ciphertext).with_context(|| format!("writing {}", path.display()))?;
    }

    let json = serde_json::to_string_pretty(&built.record).context("serializing capsa record")?;
    fs::write(output, json).with_context(|| format!("writing {}", output.display()))?;

    tracing::info!(id = %built.record.id, files = built.record.files.len(), "capsa built");
    println!("built capsa {}", built.record.id);
    println!("  record:  {}", output.display());
    println!("  payload: {} ({})", payload_dir.display(), format_size(total_bytes, BINARY));
    Ok(())
}

fn cmd_open(
    input: &PathBuf,
    party: String,
    party_key: &PathBuf,
    creator_key: &PathBuf,
    payload_dir: &PathBuf,
    out_dir: &PathBuf,
    insecure_skip_verify: bool,
) -> Result<()> {
    let record_json = fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let record: capsa_core::Capsa = serde_json::from_str(&record_json).context("parsing capsa record")?;

    let party_priv_pem =
        fs::read_to_string(party_key).with_context(|| format!("reading {}", party_key.display()))?;
    let private_key = RsaPrivateKey::from_pkcs8_pem(&party_priv_pem).context("parsing party private key")?;

    let creator_pub_pem =
        fs::read_to_string(creator_key).with_context(|| format!("reading {}", creator_key.display()))?;
    let creator_public_key =
        RsaPublicKey::from_public_key_pem(&creator_pub_pem).context("parsing creator public key")?;

    if insecure_skip_verify {
        tracing::warn!("signature verification skipped by --insecure-skip-verify");
    }

    let decrypted = verify_and_unwrap(DecryptInputs {
        capsa: &record,
        private_key: &private_key,
        party_id: Some(&party),
        creator_public_key: Some(&creator_public_key),
        verify: !insecure_skip_verify,
        cancellation: None,
    })
    .context("opening capsa")?;

    if let Some(subject) = &decrypted.subject {
        println!("subject: {subject}");
    }
    if let Some(body) = &decrypted.body {
        println!("body:\n{body}");
    }
    if let Some(structured) = &decrypted.structured {
        println!("structured: {structured}");
    }

    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    for file in &record.files {
        let ciphertext_path = payload_dir.join(&file.file_id);
        let ciphertext = fs::read(&ciphertext_path)
            .with_context(|| format!("reading {}", ciphertext_path.display()))?;
        let plaintext = decrypted
            .decrypt_file(file, &ciphertext)
            .with_context(|| format!("decrypting file {}", file.file_id))?;
        let filename = decrypted
            .decrypt_filename(file)
            .with_context(|| format!("decrypting filename for file {}", file.file_id))?;
        let out_path = out_dir.join(&filename);
        fs::write(&out_path, &plaintext).with_context(|| format!("writing {}", out_path.display()))?;
        println!("  {} -> {}", file.file_id, out_path.display());
    }

    tracing::info!(id = %record.id, party = %party, "capsa opened");
    Ok(())
}

fn mime_guess_from_extension(path: &std::path::Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
    .to_string()
}
