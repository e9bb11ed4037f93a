extern crate clap;
extern crate env_logger;
extern crate prodisk;

use clap::{App, AppSettings, Arg, SubCommand};
use std::fs;
use std::io::{self, Read, Write};
use std::process;

use prodisk::disk::format::{FLOPPY_140K, FLOPPY_800K, HARD_DISK_32M};
use prodisk::disk::{self, DiskError, FileInfo, FileType, Image, Operator, ProDOS};

// Possible exit codes
static _EXIT_SUCCESS: i32 = 0;
static EXIT_FAILURE: i32 = 1;

/// If a dash is specified for a filename, this indicates that the user wants
/// to read from standard input or write to standard output.
static STDINOUT_PSEUDOFILENAME: &str = "-";

static DEFAULT_VOLUME_NAME: &str = "BLANK";

fn main() {
    env_logger::init();

    // Parse command-line arguments
    let app = App::new("ProDOS Disk Image Utility")
        .version("0.1.0")
        .about("Read, write, and understand ProDOS-order disk images.")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("diskimage")
                .required(true)
                .help("Disk image file, or - to read an image from standard input"),
        )
        .subcommand(
            SubCommand::with_name("create")
                .about("Create and format a blank disk image")
                .arg(
                    Arg::with_name("blocks")
                        .short("b")
                        .long("blocks")
                        .takes_value(true)
                        .validator(blocks_validator)
                        .default_value("140k")
                        .help("Block count, or one of 140k, 800k, 32m"),
                )
                .arg(
                    Arg::with_name("name")
                        .short("n")
                        .long("name")
                        .takes_value(true)
                        .default_value(DEFAULT_VOLUME_NAME)
                        .help("Volume name"),
                ),
        )
        .subcommand(
            SubCommand::with_name("format")
                .about("Format a disk image, erasing its contents")
                .arg(Arg::with_name("name").required(true)),
        )
        .subcommand(
            SubCommand::with_name("catalog")
                .about("Show a directory listing")
                .arg(Arg::with_name("subdirectory").required(false))
                .arg(
                    Arg::with_name("verbose")
                        .short("v")
                        .long("verbose")
                        .help("Show more detail"),
                ),
        )
        .subcommand(
            SubCommand::with_name("read")
                .about("Read a file from a disk image.")
                .arg(Arg::with_name("source_filename").required(true))
                .arg(Arg::with_name("destination_filename").required(false)),
        )
        .subcommand(
            SubCommand::with_name("write")
                .about("Write a file to a disk image.")
                .arg(
                    Arg::with_name("type")
                        .short("t")
                        .long("type")
                        .takes_value(true)
                        .validator(type_validator)
                        .default_value("bin")
                        .help("ProDOS file type, by name or as $XX"),
                )
                .arg(
                    Arg::with_name("aux")
                        .short("a")
                        .long("aux")
                        .takes_value(true)
                        .validator(aux_validator)
                        .default_value("0")
                        .help("Auxiliary type, decimal or $XXXX"),
                )
                .arg(
                    Arg::with_name("force")
                        .short("f")
                        .long("force")
                        .help("Replace an existing file"),
                )
                .arg(Arg::with_name("source_filename").required(true))
                .arg(Arg::with_name("destination_filename").required(false)),
        )
        .subcommand(
            SubCommand::with_name("delete")
                .about("Delete a file or an empty subdirectory.")
                .arg(Arg::with_name("filename").required(true)),
        )
        .subcommand(
            SubCommand::with_name("mkdir")
                .about("Create a subdirectory.")
                .arg(Arg::with_name("path").required(true)),
        )
        .subcommand(
            SubCommand::with_name("rename")
                .about("Rename a file.")
                .arg(Arg::with_name("original_filename").required(true))
                .arg(Arg::with_name("new_filename").required(true)),
        )
        .subcommand(SubCommand::with_name("bitmap").about("Show the volume bitmap"))
        .subcommand(SubCommand::with_name("dump").about("Provide a hex dump of a disk image."))
        .subcommand(SubCommand::with_name("validate").about("Validate a disk image."));

    let mut app_clone = app.clone();
    let matches = app.get_matches();

    let diskimage = matches.value_of("diskimage").unwrap();
    let result = match matches.subcommand() {
        ("create", Some(m)) => cmd_create(
            diskimage,
            blocks_parser(m.value_of("blocks").unwrap()).unwrap(),
            m.value_of("name").unwrap(),
        ),
        ("format", Some(m)) => cmd_format(diskimage, m.value_of("name").unwrap()),
        ("catalog", Some(m)) => cmd_catalog(
            diskimage,
            m.value_of("subdirectory").unwrap_or(""),
            m.is_present("verbose"),
        ),
        ("read", Some(m)) => cmd_read(
            diskimage,
            m.value_of("source_filename").unwrap(),
            m.value_of("destination_filename"),
        ),
        ("write", Some(m)) => cmd_write(
            diskimage,
            m.value_of("source_filename").unwrap(),
            m.value_of("destination_filename"),
            m.value_of("type")
                .and_then(FileType::from_string)
                .unwrap_or(FileType::BIN),
            aux_parser(m.value_of("aux").unwrap()).unwrap(),
            m.is_present("force"),
        ),
        ("delete", Some(m)) => cmd_delete(diskimage, m.value_of("filename").unwrap()),
        ("mkdir", Some(m)) => cmd_mkdir(diskimage, m.value_of("path").unwrap()),
        ("rename", Some(m)) => cmd_rename(
            diskimage,
            m.value_of("original_filename").unwrap(),
            m.value_of("new_filename").unwrap(),
        ),
        ("bitmap", Some(_)) => cmd_bitmap(diskimage),
        ("dump", Some(_)) => cmd_dump(diskimage),
        ("validate", Some(_)) => cmd_validate(diskimage),
        _ => {
            app_clone.print_help().unwrap();
            println!();
            process::exit(EXIT_FAILURE);
        }
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(EXIT_FAILURE);
    }
}

/// Parse a block count, accepting the names of the standard volume sizes.
fn blocks_parser(v: &str) -> Result<usize, ()> {
    match v.to_lowercase().as_str() {
        "140k" => Ok(FLOPPY_140K.total_blocks as usize),
        "800k" => Ok(FLOPPY_800K.total_blocks as usize),
        "32m" => Ok(HARD_DISK_32M.total_blocks as usize),
        n => n.parse::<usize>().map_err(|_| ()),
    }
}

fn blocks_validator(v: String) -> Result<(), String> {
    match blocks_parser(&v) {
        Ok(_) => Ok(()),
        Err(_) => Err("Expected a block count, or one of 140k, 800k, 32m.".to_string()),
    }
}

fn type_validator(v: String) -> Result<(), String> {
    match FileType::from_string(&v) {
        Some(_) => Ok(()),
        None => Err(format!("Unknown file type: {}", v)),
    }
}

fn aux_parser(v: &str) -> Result<u16, ()> {
    match v.strip_prefix('$') {
        Some(hex) => u16::from_str_radix(hex, 16).map_err(|_| ()),
        None => v.parse::<u16>().map_err(|_| ()),
    }
}

fn aux_validator(v: String) -> Result<(), String> {
    match aux_parser(&v) {
        Ok(_) => Ok(()),
        Err(_) => Err("Expected a value from 0-65535, or $0000-$FFFF.".to_string()),
    }
}

/// Open a file for reading
fn open_fs_reader(filename: &str) -> io::Result<Box<dyn Read>> {
    if filename == STDINOUT_PSEUDOFILENAME {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(fs::File::open(filename)?))
    }
}

/// Open a file for writing
fn open_fs_writer(filename: &str) -> io::Result<Box<dyn Write>> {
    if filename == STDINOUT_PSEUDOFILENAME {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(fs::File::create(filename)?))
    }
}

/// Open the disk image.  A dash reads a read-only image from standard
/// input.
fn open_volume(diskimage: &str, writable: bool) -> io::Result<ProDOS> {
    if diskimage != STDINOUT_PSEUDOFILENAME {
        return ProDOS::open(diskimage, writable);
    }
    if writable {
        return Err(DiskError::ReadOnly.into());
    }
    let mut bytes = vec![];
    io::stdin().read_to_end(&mut bytes)?;
    ProDOS::new(Image::from_bytes(bytes))
}

/// The last component of a path on the volume, used as the default host
/// filename.
fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn cmd_create(diskimage: &str, total_blocks: usize, name: &str) -> io::Result<()> {
    let prodos = disk::create(diskimage, total_blocks, name)?;
    println!(
        "Created /{} with {} blocks free.",
        prodos.volume_name()?,
        prodos.free_blocks()?
    );
    Ok(())
}

fn cmd_format(diskimage: &str, name: &str) -> io::Result<()> {
    let mut prodos = open_volume(diskimage, true)?;
    prodos.format(name)
}

fn cmd_catalog(diskimage: &str, subdirectory: &str, verbose: bool) -> io::Result<()> {
    let prodos = open_volume(diskimage, false)?;
    let subdirectory = subdirectory.trim_matches('/');
    if subdirectory.is_empty() {
        println!("/{}", prodos.volume_name()?);
    } else {
        println!("/{}/{}", prodos.volume_name()?, subdirectory);
    }
    if verbose {
        println!(
            " {:<15} {:3} {:>6}  {:<15}  {:<15} {:>8} {}",
            "NAME", "TYP", "BLOCKS", "MODIFIED", "CREATED", "ENDFILE", "SUBTYPE"
        );
    }
    for descriptor in prodos.catalog(subdirectory)? {
        if verbose {
            println!("{}", descriptor);
        } else if descriptor.is_directory {
            println!("{}/", descriptor.name);
        } else {
            println!("{}", descriptor.name);
        }
    }
    println!("{} blocks free.", prodos.free_blocks()?);
    Ok(())
}

fn cmd_read(
    diskimage: &str,
    source_filename: &str,
    destination_filename: Option<&str>,
) -> io::Result<()> {
    let destination_filename = destination_filename.unwrap_or_else(|| base_name(source_filename));
    let disk = open_volume(diskimage, false)?;
    let file = disk.get_file(source_filename)?;
    let mut writer = open_fs_writer(destination_filename)?;
    writer.write_all(&file.data)?;
    writer.flush()?;
    Ok(())
}

fn cmd_write(
    diskimage: &str,
    source_filename: &str,
    destination_filename: Option<&str>,
    file_type: FileType,
    aux_type: u16,
    overwrite: bool,
) -> io::Result<()> {
    let destination_filename = destination_filename.unwrap_or_else(|| base_name(source_filename));
    let mut reader = open_fs_reader(source_filename)?;
    let mut data = vec![];
    reader.read_to_end(&mut data)?;

    let mut disk = open_volume(diskimage, true)?;
    let file = FileInfo::new(destination_filename, data).with_type(file_type, aux_type);
    disk.put_file(&file, overwrite)?;
    disk.flush()
}

fn cmd_delete(diskimage: &str, filename: &str) -> io::Result<()> {
    let mut disk = open_volume(diskimage, true)?;
    if !disk.delete(filename)? {
        return Err(DiskError::NotFound.into());
    }
    disk.flush()
}

fn cmd_mkdir(diskimage: &str, path: &str) -> io::Result<()> {
    let mut disk = open_volume(diskimage, true)?;
    disk.create_directory(path)?;
    disk.flush()
}

fn cmd_rename(diskimage: &str, original_filename: &str, new_filename: &str) -> io::Result<()> {
    let mut disk = open_volume(diskimage, true)?;
    disk.rename(original_filename, new_filename)?;
    disk.flush()
}

fn cmd_bitmap(diskimage: &str) -> io::Result<()> {
    let prodos = open_volume(diskimage, false)?;
    print!("{:?}", prodos.bitmap()?);
    Ok(())
}

fn cmd_dump(diskimage: &str) -> io::Result<()> {
    let prodos = open_volume(diskimage, false)?;
    prodos.dump(&mut io::stdout())?;
    io::stdout().flush()?;
    Ok(())
}

fn cmd_validate(diskimage: &str) -> io::Result<()> {
    let disk = open_volume(diskimage, false)?;
    let errors = disk.validate()?;
    for e in errors.iter() {
        println!("{}", e);
    }
    if errors.is_empty() {
        println!("Disk validates successfully.");
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} errors found during validation.", errors.len()),
        ))
    }
}
